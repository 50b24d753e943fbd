//! Exposes the command line application.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use meshcache_service::config::Config;
use meshcache_service::{gateway, logging, metrics};

/// Gateway commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Run,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(name = "meshcache-gateway", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long = "config", short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config.as_deref()).context("failed loading config")?;

    logging::init_logging(&config);
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(&config.metrics.prefix, statsd, config.metrics.custom_tags.clone());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("meshcache-gateway")
        .enable_all()
        .build()
        .context("failed to build the runtime")?;

    match cli.command {
        Command::Run => runtime
            .block_on(gateway::run(&config))
            .context("failed to run the gateway"),
    }
}
