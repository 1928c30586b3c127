//! # CLI
//!
//! Command-line flags of `obs-grpc-proxy`. Every flag except `--log-level` can also be set
//! through the environment.
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "obs-grpc-proxy",
    version,
    about = "Expose the OBS Studio websocket API as a gRPC service"
)]
pub struct Cli {
    /// The address to listen for gRPC connections on
    #[arg(long, env = "OBS_GRPC_LISTEN_ADDR", default_value = "localhost:4456")]
    pub listen_addr: String,

    /// OBS WebSocket address (host:port or ws:// URL)
    #[arg(long, env = "OBS_WS_ADDR", default_value = "localhost:4455")]
    pub obs_ws_addr: String,

    /// OBS WebSocket password
    #[arg(long, env = "OBS_PASSWORD", default_value = "", hide_env_values = true)]
    pub obs_password: String,

    /// Default log filter (e.g. "debug", "obs_grpc_core=trace"), overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["obs-grpc-proxy"]).unwrap();
        assert_eq!(cli.obs_ws_addr, "localhost:4455");
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "obs-grpc-proxy",
            "--listen-addr",
            "0.0.0.0:5000",
            "--obs-ws-addr",
            "ws://studio.lan:4455",
            "--obs-password",
            "hunter2",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.listen_addr, "0.0.0.0:5000");
        assert_eq!(cli.obs_ws_addr, "ws://studio.lan:4455");
        assert_eq!(cli.obs_password, "hunter2");
        assert_eq!(cli.log_level, "debug");
    }
}
