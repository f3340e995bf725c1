//! chunkup command-line entry point.

mod app;
mod args;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries progress lines.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = args::Args::parse();

    let config = config::Config::load(args.config.as_deref())?;
    tracing::debug!(endpoint = %config.endpoint, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let success = rt.block_on(app::run(config, args.command))?;
    if !success {
        std::process::exit(1);
    }
    Ok(())
}
