//! # OBS gRPC CLI Entry Point
//!
//! 1. Parses the command line.
//! 2. Resolves the method against the descriptors embedded in `obs_grpc_core`.
//! 3. Connects to the proxy and prints responses (or events) as JSON.
use clap::Parser;
use cli::{Cli, Commands};
use client::GrpcClient;
use descriptor::DescriptorRegistry;
use futures_util::StreamExt;
use prost_reflect::MethodDescriptor;
use std::process;

mod cli;
mod client;
mod codec;
mod descriptor;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Cli::parse();
    let registry = DescriptorRegistry::embedded()?;

    match args.command {
        Commands::List => {
            registry.methods().for_each(|m| println!("{}", describe(&m)));
            Ok(())
        }
        Commands::Call { method, body } => {
            let method = registry.method(&method)?;
            anyhow::ensure!(
                !method.is_server_streaming(),
                "'{}' streams its responses, use the `events` subcommand",
                method.name()
            );

            let mut client = GrpcClient::connect(&args.grpc_proxy_addr).await?;
            match client.unary(&method, body).await? {
                Ok(response) => print_json(&response),
                Err(status) => Err(status_error(&status)),
            }
        }
        Commands::Events { event_types } => {
            let method = registry.method("SubscribeEvents")?;
            let body = serde_json::json!({ "eventTypes": event_types });

            let mut client = GrpcClient::connect(&args.grpc_proxy_addr).await?;
            let mut events = match client.server_streaming(&method, body).await? {
                Ok(events) => events,
                Err(status) => return Err(status_error(&status)),
            };

            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => println!("{event}"),
                    Err(status) => return Err(status_error(&status)),
                }
            }
            Ok(())
        }
    }
}

fn describe(method: &MethodDescriptor) -> String {
    let stream = if method.is_server_streaming() { "stream " } else { "" };
    format!(
        "{}({}) returns ({stream}{})",
        method.name(),
        method.input().name(),
        method.output().name()
    )
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status_error(status: &tonic::Status) -> anyhow::Error {
    anyhow::anyhow!("{:?}: {}", status.code(), status.message())
}
