//! # Switchboard Server
//!
//! WebSocket hub with room-based fan-out.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! switchboard
//!
//! # Run with custom config
//! switchboard --config /path/to/switchboard.toml
//!
//! # Run with environment variables
//! SWITCHBOARD__PORT=8080 SWITCHBOARD__HUB__OUTBOUND_CAPACITY=64 switchboard
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parse `--config <path>` / `--config=<path>` from the command line.
fn config_path(args: impl IntoIterator<Item = String>) -> Result<Option<PathBuf>> {
    let mut args = args.into_iter();
    let mut path = None;
    while let Some(arg) = args.next() {
        if arg == "--config" {
            match args.next() {
                Some(value) => path = Some(PathBuf::from(value)),
                None => bail!("--config requires a path"),
            }
        } else if let Some(value) = arg.strip_prefix("--config=") {
            path = Some(PathBuf::from(value));
        } else {
            bail!("Unknown argument: {arg}");
        }
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let path = config_path(std::env::args().skip(1))?;
    let config = config::Config::load(path.as_deref())?;

    tracing::info!("Starting Switchboard server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_config_path() {
        assert_eq!(config_path(args(&[])).unwrap(), None);
        assert_eq!(
            config_path(args(&["--config", "a.toml"])).unwrap(),
            Some(PathBuf::from("a.toml"))
        );
        assert_eq!(
            config_path(args(&["--config=b.toml"])).unwrap(),
            Some(PathBuf::from("b.toml"))
        );
        assert!(config_path(args(&["--config"])).is_err());
        assert!(config_path(args(&["--verbose"])).is_err());
    }
}
