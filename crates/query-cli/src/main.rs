use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::*;
use config::Config;

#[derive(Parser)]
#[command(name = "qe-shard")]
#[command(author, version, about = "Query Engine - sharded time-series query runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query sharded by metric against simulated shards
    Run {
        /// Metrics to query, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        metrics: Vec<String>,

        /// Maximum sub queries in flight
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Merge strategy (largest, concat, coalesce)
        #[arg(long)]
        merge: Option<String>,

        /// Make the shard for this metric fail
        #[arg(short, long)]
        fail: Option<String>,

        /// Cancel the query after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,

        /// Base shard latency in milliseconds
        #[arg(short, long)]
        latency_ms: Option<u64>,

        /// Data points per metric
        #[arg(long)]
        points: Option<usize>,
    },

    /// Show the effective sharding configuration
    Config {
        /// Maximum sub queries in flight
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Merge strategy
        #[arg(long)]
        merge: Option<String>,

        /// Write the effective configuration to this file
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    // Load configuration
    let config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Run {
            metrics,
            parallel,
            merge,
            fail,
            cancel_after_ms,
            latency_ms,
            points,
        } => {
            print_banner();
            let config = config.with_overrides(parallel, merge, latency_ms, points);
            run_query(&config, &metrics, fail, cancel_after_ms).await?;
        }
        Commands::Config {
            parallel,
            merge,
            save,
        } => {
            let config = config.with_overrides(parallel, merge, None, None);
            show_config(&config, save.as_deref())?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "query_cli=debug,query_core=debug,query_planner=debug,query_distributed=debug"
    } else {
        "query_cli=info,query_distributed=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        "Query Engine sharded runner v0.1.0".bright_yellow()
    );
    println!(
        "{}",
        "Sub queries run with bounded parallelism and merge in metric order\n".bright_black()
    );
}
