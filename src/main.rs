//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `scan_fleet` library that handles:
//! - Command-line argument parsing
//! - Environment variable loading (.env file)
//! - Logger initialization
//! - Ctrl-C handling and user-facing output
//!
//! All core functionality is implemented in the library crate.

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use std::process;
use tokio_util::sync::CancellationToken;

use scan_fleet::initialization::init_logger_with;
use scan_fleet::{run_scan, LogFormat, Opt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    // Try the current directory first, then the executable's directory
    if dotenvy::dotenv().is_err() {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let env_path = exe_dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                }
            }
        }
    }

    let opt = Opt::parse();
    let config = opt.to_config();
    let filters = opt.filters();

    init_logger_with(config.log_level.clone().into(), config.log_format.clone())
        .context("Failed to initialize logger")?;

    if config.scope.is_empty() {
        warn!("No --scope given: nothing will be scanned");
    }

    // First Ctrl-C stops polling; running scans at the provider are abandoned
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing up. In-flight results are dropped");
            on_signal.cancel();
        }
    });

    let db_path = config.db_path.clone();
    let json_summary = matches!(config.log_format, LogFormat::Json);
    match run_scan(config, filters, cancel).await {
        Ok(report) if json_summary => {
            println!("{}", serde_json::to_string(&report)?);
            Ok(())
        }
        Ok(report) => {
            println!(
                "✅ {} work unit{}: {} target{} scanned ({} changed, {} unchanged, {} errored, {} abandoned) in {:.1}s",
                report.units,
                if report.units == 1 { "" } else { "s" },
                report.targets,
                if report.targets == 1 { "" } else { "s" },
                report.stored,
                report.refreshed,
                report.errored,
                report.abandoned,
                report.elapsed_seconds
            );
            println!("Results saved in {}", db_path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("scan_fleet error: {:#}", e);
            process::exit(1);
        }
    }
}
