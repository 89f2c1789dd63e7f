//! Grading engine maintenance CLI
//!
//! Runs the task reclaimer against a grading store and exposes the
//! arbitration resolver for quick checks.
//!
//! # Usage
//!
//! ```bash
//! # Reclaim stale assignments until Ctrl-C
//! grading --state-path ./grading-state reclaim
//!
//! # One reclaim pass
//! grading --state-path ./grading-state sweep
//!
//! # Resolve a disputed paper
//! grading resolve 10 20 14 --tolerance 5
//!
//! # Custom configuration
//! GRADING_SWEEP_INTERVAL_SECS=30 grading --config grading.toml reclaim
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use grading::engine::arbitration;
use grading::identity::StaticDirectory;
use grading::state::SharedPaperStore;
use grading::{EngineConfig, GradingEngine};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (GRADING_* variables still override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the RocksDB state directory
    #[arg(long)]
    state_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reclaimer loop until interrupted
    Reclaim,
    /// Run a single reclaim pass and print its statistics
    Sweep,
    /// Reconcile three marks and print the resolution as JSON
    Resolve {
        first: i64,
        second: i64,
        third: i64,
        /// Maximum accepted distance between two marks
        #[arg(long)]
        tolerance: i64,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "heavy-state")]
fn open_store(state_path: Option<PathBuf>) -> Result<SharedPaperStore> {
    let state_path = state_path.unwrap_or_else(|| {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".grading-state")
    });
    tracing::info!("Grading state path: {}", state_path.display());

    let store: SharedPaperStore = grading::state::StateStore::open(&state_path)
        .map_err(|e| anyhow::anyhow!("Failed to open state store: {}", e))?
        .shared();
    Ok(store)
}

#[cfg(not(feature = "heavy-state"))]
fn open_store(state_path: Option<PathBuf>) -> Result<SharedPaperStore> {
    if let Some(path) = state_path {
        anyhow::bail!(
            "--state-path {} requires the heavy-state feature",
            path.display()
        );
    }
    tracing::warn!("No persistent store compiled in; using an empty in-memory store");
    let store: SharedPaperStore = grading::state::MemoryStore::new().shared();
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("grading=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Resolve {
            first,
            second,
            third,
            tolerance,
        } => {
            let resolution = arbitration::resolve(first, second, third, tolerance);
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }
        Command::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Sweep => {
            let store = open_store(args.state_path)?;
            let engine = GradingEngine::new(store, StaticDirectory::new().shared(), config);
            let stats = engine.reclaimer().sweep(Utc::now())?;
            println!(
                "due={} reclaimed={} already_consumed={}",
                stats.due, stats.reclaimed, stats.already_consumed
            );
        }
        Command::Reclaim => {
            let store = open_store(args.state_path)?;
            let interval = config.sweep_interval();
            let engine = GradingEngine::new(store, StaticDirectory::new().shared(), config);

            tracing::info!(
                "Starting reclaimer: interval={}s, reclaim_after={}s",
                interval.as_secs(),
                engine.config().reclaim_after_secs
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = engine.reclaimer().spawn(shutdown_rx);

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down reclaimer");
            let _ = shutdown_tx.send(true);
            handle.await?;
        }
    }

    Ok(())
}
