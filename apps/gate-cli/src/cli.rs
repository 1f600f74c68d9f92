use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use gate_protocol::{GateAction, ViewingSide};

#[derive(Parser)]
#[command(name = "gate-cli")]
#[command(about = "Remote control for the gate over MQTT")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ~/.config/gate-remote/gate.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Broker username; falls back to the stored credentials
    #[arg(short, long, env = "GATE_USERNAME", global = true)]
    pub username: Option<String>,

    /// Broker password; falls back to the stored credentials
    #[arg(short, long, env = "GATE_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Send one command and wait for the device's answer
    Send {
        /// full, pedestrian, left or right
        #[arg(short, long)]
        action: GateAction,

        /// Side of the gate you are viewing from (inside or outside)
        #[arg(long, value_parser = parse_side)]
        side: Option<ViewingSide>,

        /// Store the credentials after a successful connect
        #[arg(long)]
        remember: bool,

        /// Seconds to wait for the acknowledgement
        #[arg(long, default_value = "10")]
        wait_secs: u64,
    },

    /// Send one command through the device's signed HTTP API
    Http {
        /// full, pedestrian, left or right
        #[arg(short, long)]
        action: GateAction,

        /// Side of the gate you are viewing from (inside or outside)
        #[arg(long, value_parser = parse_side)]
        side: Option<ViewingSide>,

        /// Device base URL
        #[arg(long, env = "GATE_URL", default_value = "http://localhost:8080")]
        url: String,

        /// Shared request signing secret
        #[arg(long, env = "GATE_API_SECRET", hide_env_values = true)]
        secret: String,

        #[arg(long, env = "GATE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Report whether the device is sending heartbeats
    Status {
        /// Seconds to listen for a heartbeat
        #[arg(long, default_value = "65")]
        wait_secs: u64,
    },

    /// Run a simulated gate device against the broker
    Device {
        #[arg(long, default_value = "gate_device")]
        client_id: String,

        /// Button hold time in milliseconds
        #[arg(long, default_value = "1000")]
        press_ms: u64,

        /// Also serve the signed HTTP control API on this address
        #[arg(long)]
        http_listen: Option<SocketAddr>,

        /// Secret for the HTTP control API
        #[arg(long, env = "GATE_API_SECRET", hide_env_values = true)]
        api_secret: Option<String>,

        #[arg(long, env = "GATE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Forget the stored credentials
    Forget,
}

fn parse_side(s: &str) -> Result<ViewingSide, String> {
    match s {
        "inside" => Ok(ViewingSide::Inside),
        "outside" => Ok(ViewingSide::Outside),
        other => Err(format!("expected inside or outside, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_parses_action_and_side() {
        let cli = Cli::try_parse_from([
            "gate-cli", "send", "--action", "left", "--side", "outside", "-u", "alice", "-p", "pw",
        ])
        .unwrap();
        assert_eq!(cli.username.as_deref(), Some("alice"));
        match cli.command {
            Command::Send {
                action,
                side,
                remember,
                wait_secs,
            } => {
                assert_eq!(action, GateAction::Left);
                assert_eq!(side, Some(ViewingSide::Outside));
                assert!(!remember);
                assert_eq!(wait_secs, 10);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn http_and_device_listen_flags() {
        let cli = Cli::try_parse_from([
            "gate-cli", "http", "-a", "full", "--secret", "s3cret", "--url", "http://gate:8080",
        ])
        .unwrap();
        match cli.command {
            Command::Http {
                action, url, secret, ..
            } => {
                assert_eq!(action, GateAction::Full);
                assert_eq!(url, "http://gate:8080");
                assert_eq!(secret, "s3cret");
            }
            _ => panic!("expected http"),
        }

        let cli = Cli::try_parse_from([
            "gate-cli", "device", "--http-listen", "0.0.0.0:8080", "--api-secret", "s3cret",
        ])
        .unwrap();
        match cli.command {
            Command::Device { http_listen, .. } => {
                assert_eq!(http_listen, Some("0.0.0.0:8080".parse().unwrap()));
            }
            _ => panic!("expected device"),
        }
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(Cli::try_parse_from(["gate-cli", "send", "--action", "open"]).is_err());
        assert!(
            Cli::try_parse_from(["gate-cli", "send", "--action", "full", "--side", "above"])
                .is_err()
        );
    }
}
