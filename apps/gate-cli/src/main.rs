//! Gate remote command-line entry point.

mod app;
mod cli;
mod http;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting gate-cli");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(cli))
}
