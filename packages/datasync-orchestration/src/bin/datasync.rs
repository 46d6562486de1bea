//! Datasync CLI
//!
//! # Usage
//!
//! ```bash
//! # Run forever: one cycle now, then every `sync.interval_minutes`
//! datasync --config appsettings.json
//!
//! # Single cycle (cron style)
//! datasync --config datasync.yaml --once
//!
//! # Connectivity check only
//! datasync --config datasync.yaml --check
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use datasync_orchestration::{logging, Runtime, SyncConfig};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "datasync",
    version,
    about = "Incremental row-to-parameter sync into a relational sink"
)]
struct Cli {
    /// Configuration file (.json, .yaml or .yml)
    #[arg(short, long, default_value = "appsettings.json")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single cycle and exit
    #[arg(long, conflicts_with = "check")]
    once: bool,

    /// Test connectivity of every collaborator and exit
    #[arg(long)]
    check: bool,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let config = SyncConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    info!(
        config = %cli.config.display(),
        sources = config.sources.len(),
        interval_minutes = config.sync.interval_minutes,
        "Configuration loaded"
    );

    let runtime = Runtime::new(config).context("building collaborators")?;

    if cli.check {
        let report = runtime.check_connectivity().await;
        for (name, outcome) in &report.sources {
            match outcome {
                None => info!(source = %name, "OK"),
                Some(e) => warn!(source = %name, error = %e, "UNREACHABLE"),
            }
        }
        match &report.sink {
            None => info!("Sink OK"),
            Some(e) => error!(error = %e, "Sink UNREACHABLE"),
        }
        if !report.all_ok() {
            std::process::exit(1);
        }
        return Ok(());
    }

    runtime.startup().await?;

    if cli.once {
        let report = runtime.run_once().await;
        if report.aborted {
            anyhow::bail!("cycle aborted: sink unreachable");
        }
        return Ok(());
    }

    info!("Press Ctrl-C to stop");
    runtime.run_until(shutdown_signal()).await;
    Ok(())
}
