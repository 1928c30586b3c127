//! # OBS gRPC Proxy Entry Point
//!
//! 1. **Initialization**: Parses the flags with [`cli::Cli`] and sets up `tracing`.
//! 2. **Wiring**: Builds the [`Proxy`] on top of an [`ObsConnector`] and starts its event
//!    pump.
//! 3. **Serving**: Serves `obs_grpc.Obs` and server reflection until Ctrl-C.
//! 4. **Shutdown**: Stops the pump, then releases the OBS session.
mod cli;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use obs_grpc_core::FILE_DESCRIPTOR_SET;
use obs_grpc_core::connection::BackendEvent;
use obs_grpc_core::events::EventObserver;
use obs_grpc_core::proxy::Proxy;
use obs_grpc_core::websocket::ObsConnector;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Logs every OBS event.
struct EventLogger;

#[tonic::async_trait]
impl EventObserver for EventLogger {
    async fn process_event(&self, event: &BackendEvent) {
        debug!(
            event_type = %event.event_type,
            event_intent = event.event_intent,
            "OBS event"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(&args.log_level);

    let password = Some(args.obs_password).filter(|p| !p.is_empty());
    let connector = ObsConnector::new(args.obs_ws_addr.clone(), password);
    let (proxy, pump) = Proxy::builder(connector).observer(EventLogger).build();

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("unable to build the reflection service")?;

    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("unable to listen on '{}'", args.listen_addr))?;
    info!(
        address = %listener.local_addr()?,
        obs = %args.obs_ws_addr,
        "started the gRPC server"
    );

    let token = CancellationToken::new();
    let pump = pump.start(token.clone());

    let served = Server::builder()
        .add_service(reflection)
        .add_service(proxy.clone().into_service())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown_signal())
        .await;

    token.cancel();
    pump.await.context("the event pump panicked")?;
    proxy.shutdown().await;

    served.context("unable to serve gRPC")?;
    info!("bye");
    Ok(())
}

fn init_logging(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C, shutting down"),
        Err(err) => {
            error!(error = %err, "unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
