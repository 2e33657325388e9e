//! autoplan - Main Entry Point

use clap::Parser;
use autoplan::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autoplan=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    cli::run(Cli::parse())
}
