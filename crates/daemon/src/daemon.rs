//! Daemon startup and main loop for the media sync daemon.
//!
//! Provides the daemon entry point, startup sequence, and shutdown handling.

use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::db::{self, StatusCounts, StoreError};
use crate::metrics::{collect_system_metrics, new_shared_metrics, SharedMetrics};
use crate::metrics_server::run_metrics_server;
use crate::pipeline::{Pipeline, PipelineError, ProcessOutcome};
use crate::startup::{run_startup_checks, StartupError};
use crate::watcher::WatcherRegistry;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Failures surfaced while bringing the daemon up.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Database error: {0}")]
    Store(#[from] StoreError),
}

/// The assembled daemon: config, database pool, pipeline, and watchers.
pub struct Daemon {
    /// Effective configuration after env overrides.
    pub config: Config,
    /// Encoder cap derived at startup.
    pub concurrency_plan: ConcurrencyPlan,
    /// Snapshot shared with the HTTP endpoint.
    pub metrics: SharedMetrics,
    /// Pipeline executor driving files to terminal status
    pub pipeline: Arc<Pipeline>,
    /// Per-project folder watchers
    pub watchers: Arc<WatcherRegistry>,
    db: Pool<Sqlite>,
}

impl Daemon {
    /// Full startup from a config file: load it, apply env overrides, run
    /// the preflight checks, open the database, and requeue files a
    /// previous run left in processing.
    pub async fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config).await
    }

    /// Same startup sequence, for a configuration already in hand.
    pub async fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Self::build(config).await
    }

    /// Skips the preflight checks. For tests on machines without ffmpeg
    /// or ffprobe installed.
    pub async fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        Self::build(config).await
    }

    async fn build(config: Config) -> Result<Self, DaemonError> {
        let concurrency_plan = derive_plan(&config);
        let metrics = new_shared_metrics();

        let db = db::connect(&config.paths.database).await?;
        db::init_schema(&db).await?;

        // A row stuck in processing means a previous run died mid-flight;
        // putting it back to pending lets the initial sync pick it up
        let requeued = db::reset_stale_processing(&db).await?;
        if requeued > 0 {
            info!(requeued, "requeued files left in processing by a previous run");
        }

        let pipeline = Arc::new(Pipeline::new(
            db.clone(),
            &config,
            concurrency_plan,
            metrics.clone(),
        ));
        let watchers = Arc::new(WatcherRegistry::new(
            db.clone(),
            Arc::clone(&pipeline),
            metrics.clone(),
            &config,
        ));

        Ok(Self {
            config,
            concurrency_plan,
            metrics,
            pipeline,
            watchers,
            db,
        })
    }

    /// Handle to the shared metrics snapshot.
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Queue a reconcile pass for a watched project
    pub async fn request_sync(&self, project_id: i64) -> bool {
        self.watchers.request_sync(project_id).await
    }

    /// Re-queue a failed file through the pipeline
    pub async fn retry_file(
        &self,
        file_id: &str,
        force: bool,
    ) -> Result<ProcessOutcome, PipelineError> {
        self.pipeline.retry_file(file_id, force).await
    }

    /// Count media files per transcoding status
    pub async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        db::count_by_status(&self.db).await
    }

    /// Delete a media file record on behalf of the collaborator API.
    ///
    /// Removes the row and any transcoded artifact on disk. The original
    /// file is left alone; removing it is the caller's call, and the next
    /// reconcile pass would delete the row anyway if they do.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), DaemonError> {
        let file = db::get_media_file(&self.db, file_id).await?;
        db::delete_by_path(&self.db, file.project_id, &file.file_path).await?;

        if let Some(artifact) = &file.transcoded_file_path {
            if let Err(err) = tokio::fs::remove_file(artifact).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(file_id, artifact, error = %err, "could not remove transcoded artifact");
                }
            }
        }

        Ok(())
    }

    /// Start watching every project folder named in the configuration.
    ///
    /// Each watcher queues its own initial reconcile pass, which also
    /// re-enqueues pending rows recovered at startup. A project whose root
    /// cannot be watched (missing mount, bad assignment) is logged and left
    /// down; the remaining projects still come up. Returns the number of
    /// watchers started.
    pub async fn start_watchers(&self) -> usize {
        let mut started = 0;
        for project in &self.config.projects {
            match self.watchers.start(project.id, &project.root).await {
                Ok(()) => started += 1,
                Err(err) => {
                    error!(
                        project_id = project.id,
                        root = %project.root.display(),
                        error = %err,
                        "project folder is not syncing; watcher down until restarted"
                    );
                }
            }
        }
        started
    }

    /// Spawn the metrics HTTP server in the background, or return None
    /// when it is disabled in configuration.
    pub fn start_metrics_server(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.metrics.enabled {
            return None;
        }

        let metrics = self.metrics.clone();
        let bind = self.config.metrics.bind.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics, &bind).await {
                error!("Metrics server error: {}", e);
            }
        }))
    }

    /// Spawn the background task refreshing system metrics and the
    /// pending-queue gauge.
    pub fn start_metrics_updater(&self) -> tokio::task::JoinHandle<()> {
        let metrics = self.metrics.clone();
        let db = self.db.clone();
        tokio::spawn(async move {
            loop {
                let system_metrics = collect_system_metrics();
                let queue_len = match db::count_by_status(&db).await {
                    Ok(counts) => Some(counts.pending as usize),
                    Err(e) => {
                        error!("Failed to count pending files: {}", e);
                        None
                    }
                };
                {
                    let mut snapshot = metrics.write().await;
                    snapshot.system = system_metrics;
                    snapshot.timestamp_unix_ms = unix_timestamp_ms();
                    if let Some(len) = queue_len {
                        snapshot.queue_len = len;
                    }
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    }

    /// Start all background tasks without blocking.
    pub async fn start(&self) -> Result<(), DaemonError> {
        let _server_handle = self.start_metrics_server();
        let _updater_handle = self.start_metrics_updater();
        let watching = self.start_watchers().await;
        info!(
            watching,
            projects = self.config.projects.len(),
            max_concurrent = self.concurrency_plan.max_concurrent_transcodes,
            "daemon started"
        );
        Ok(())
    }

    /// Stop all folder watchers.
    pub async fn shutdown(&self) {
        self.watchers.stop_all().await;
        info!("daemon stopped");
    }

    /// Run the daemon until a shutdown signal arrives.
    ///
    /// Starts the metrics server, metrics updater, and project watchers,
    /// then waits for Ctrl+C or SIGTERM and tears the watchers down.
    pub async fn run(&self) -> Result<(), DaemonError> {
        self.start().await?;
        shutdown_signal().await;
        self.shutdown().await;
        Ok(())
    }
}

/// Resolves when Ctrl+C or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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

/// Wall-clock milliseconds since the Unix epoch.
fn unix_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
