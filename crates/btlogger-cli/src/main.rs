//! BTLogger CLI entry point

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use btlogger_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref(), cli.log_dir.as_deref())
        .context("Failed to load configuration")?;
    debug!("Session files under {}", config.storage.root.display());

    CommandDispatcher::execute(cli.command, config)
        .await
        .context("Command failed")?;
    Ok(())
}

/// `RUST_LOG` decides the filter unless `--verbose` is given
fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
