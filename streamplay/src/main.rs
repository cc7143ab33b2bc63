//! streamplay - Main entry point
//!
//! Plays one MPEG audio file on the default output device until the file
//! ends or the process receives Ctrl+C / SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamplay::config::{log_filter, PipelineConfig};
use streamplay::PipelineDriver;

/// Command-line arguments for streamplay
#[derive(Parser, Debug)]
#[command(name = "streamplay")]
#[command(about = "Stream an MPEG audio file to the default output device")]
#[command(version)]
struct Args {
    /// MPEG audio file to play
    #[arg(default_value = "output.mp3", env = "STREAMPLAY_INPUT")]
    input: PathBuf,

    /// Configuration file (default: <config dir>/streamplay/config.toml)
    #[arg(short, long, env = "STREAMPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides RUST_LOG and the config file)
    #[arg(short, long, env = "STREAMPLAY_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded before the subscriber exists: the logging section decides the filter
    let config_path = PipelineConfig::resolve_path(args.config.as_deref());
    let config = match &config_path {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    }
    .context("Failed to load configuration")?;

    // Initialize tracing
    let filter = match args.log_level.as_deref() {
        Some(level) => tracing_subscriber::EnvFilter::try_new(log_filter(Some(level), &config.logging))
            .context("Invalid log level")?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| log_filter(None, &config.logging).into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting streamplay {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("No configuration file, using built-in defaults"),
    }
    info!("Input: {}", args.input.display());

    let summary = PipelineDriver::new(config)
        .play_file(&args.input, shutdown_signal())
        .await
        .context("Playback failed")?;

    info!("Stopped ({:?}): {:?}", summary.reason, summary.fifo);
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
