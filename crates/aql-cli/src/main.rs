//! ApproxQL CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use aql_core::{Backend, EngineConfig};
use aql_engine::QueryExecutor;

#[derive(Parser)]
#[command(name = "approxql")]
#[command(about = "ApproxQL - Approximate aggregate queries from trained surrogates")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Engine config (JSON). Flags below override individual keys.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Warehouse root directory
    #[arg(long, global = true)]
    warehouse: Option<PathBuf>,

    /// Regression backend for grouped models (qreg, mdn)
    #[arg(long, global = true)]
    backend: Option<Backend>,

    /// Print timing lines
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one statement (CREATE TABLE ... or SELECT ...)
    Exec {
        /// The statement to run
        sql: String,

        /// Output file for the result (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the models registered in the warehouse
    Models,

    /// Print version information
    Version,
}

fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut cfg = match (&cli.config, &cli.warehouse) {
        (Some(path), _) => EngineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        (None, Some(warehouse)) => EngineConfig::with_warehouse(warehouse.clone()),
        (None, None) => bail!("provide --warehouse or --config"),
    };
    if let Some(warehouse) = &cli.warehouse {
        cfg.warehouse_dir = warehouse.clone();
    }
    if let Some(backend) = cli.backend {
        cfg.backend = backend;
    }
    if cli.verbose {
        cfg.verbose = true;
    }
    Ok(cfg)
}

fn emit_json(json: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match &cli.command {
        Commands::Exec { sql, output } => {
            let config = build_config(&cli)?;
            let mut executor = QueryExecutor::open(config)?;
            let result = executor.execute(sql)?;
            let json = serde_json::to_string_pretty(&result)?;
            emit_json(&json, output.as_ref())?;
        }
        Commands::Models => {
            let config = build_config(&cli)?;
            let executor = QueryExecutor::open(config)?;
            let keys: Vec<&str> = executor.catalog().keys().collect();
            let json = serde_json::to_string_pretty(&keys)?;
            emit_json(&json, None)?;
        }
        Commands::Version => {
            println!("approxql {}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
