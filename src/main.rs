use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mnemo::cli;

fn main() -> Result<()> {
    // Secrets (EMBEDDING_API_KEY) may live in a .env next to the journal
    dotenvy::dotenv().ok();

    // Parse CLI first to check verbose flag
    let cli = cli::Cli::parse();

    // Log to stderr to keep stdout clean for structured output
    // (--porcelain progress lines, JSON results)
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    cli::run_with(cli)
}
