//! Exposes the command line application.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use meshcache_service::config::Config;
use meshcache_service::{logging, metrics};

use crate::node;

/// Meshcache commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the cache node.
    Run,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(name = "meshcache", version)]
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

    match cli.command {
        Command::Run => node::run(config).context("failed to run the cache node"),
    }
}
