//! CLI entry point for the media sync daemon
//!
//! Parses command line arguments and starts the daemon.

use clap::Parser;
use media_sync_daemon::{Config, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Media Sync Daemon - watches project folders and normalizes video for streaming
#[derive(Parser, Debug)]
#[command(name = "media-sync-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip startup checks (ffmpeg, ffprobe). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_sync_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Media sync daemon starting, config: {}", args.config.display());

    let daemon_result = if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        match Config::load(&args.config) {
            Ok(config) => Daemon::new_without_checks(config).await,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        Daemon::new(&args.config).await
    };

    match daemon_result {
        Ok(daemon) => {
            info!(
                "Daemon initialized, {} max concurrent transcodes across {} cores",
                daemon.concurrency_plan.max_concurrent_transcodes, daemon.concurrency_plan.total_cores
            );
            if daemon.config.metrics.enabled {
                info!(
                    "Metrics server on http://{}/metrics",
                    daemon.config.metrics.bind
                );
            }

            if let Err(e) = daemon.run().await {
                error!("Daemon error: {}", e);
                return ExitCode::FAILURE;
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to initialize daemon: {}", e);
            ExitCode::FAILURE
        }
    }
}
