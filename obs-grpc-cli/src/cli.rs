//! # CLI
//!
//! Command-line interface of `obs-grpc-cli`.
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "obs-grpc-cli", version, about = "Call the OBS gRPC proxy with JSON")]
pub struct Cli {
    /// Address of the OBS gRPC proxy
    #[arg(
        long,
        global = true,
        env = "OBS_GRPC_PROXY_ADDR",
        default_value = "http://localhost:4456"
    )]
    pub grpc_proxy_addr: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Call a unary method, e.g. `call GetSceneList`
    Call {
        /// Method name, either `GetVersion` or `obs_grpc.Obs/GetVersion`
        method: String,

        /// Request message as proto3 JSON (bytes fields are base64)
        #[arg(long, default_value = "{}", value_parser = parse_body)]
        body: serde_json::Value,
    },

    /// List the methods the proxy serves
    List,

    /// Print OBS events as they arrive, one JSON document per line
    Events {
        /// Only print events of this type (repeatable)
        #[arg(long = "type", value_name = "EVENT_TYPE")]
        event_types: Vec<String>,
    },
}

fn parse_body(body: &str) -> Result<serde_json::Value, String> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;

    if value.is_object() {
        Ok(value)
    } else {
        Err("the body must be a JSON object".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_defaults_to_an_empty_body() {
        let cli = Cli::try_parse_from(["obs-grpc-cli", "call", "GetVersion"]).unwrap();

        assert_eq!(cli.grpc_proxy_addr, "http://localhost:4456");
        match cli.command {
            Commands::Call { method, body } => {
                assert_eq!(method, "GetVersion");
                assert_eq!(body, serde_json::json!({}));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_events_collects_every_type() {
        let cli = Cli::try_parse_from([
            "obs-grpc-cli",
            "events",
            "--type",
            "SceneCreated",
            "--type",
            "InputMuteStateChanged",
            "--grpc-proxy-addr",
            "studio.lan:4456",
        ])
        .unwrap();

        assert_eq!(cli.grpc_proxy_addr, "studio.lan:4456");
        match cli.command {
            Commands::Events { event_types } => {
                assert_eq!(event_types, ["SceneCreated", "InputMuteStateChanged"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_body_must_be_an_object() {
        let err = Cli::try_parse_from(["obs-grpc-cli", "call", "CreateScene", "--body", "[1]"])
            .unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));

        let err = Cli::try_parse_from(["obs-grpc-cli", "call", "CreateScene", "--body", "{"])
            .unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }
}
