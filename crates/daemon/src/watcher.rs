//! Project folder watching.
//!
//! A thin wrapper around `notify` that debounces raw filesystem notifications
//! into reconcile passes. Each watched project gets one watcher on its root,
//! one bounded channel, and one consumer task, so at most a single sync pass
//! runs per project at a time no matter how bursty the folder is.

use crate::db::{self, StoreError};
use crate::media::{MediaFile, TranscodingStatus};
use crate::metrics::SharedMetrics;
use crate::pipeline::{Pipeline, PipelineError};
use crate::reconcile;
use crate::stability::{self, StabilityResult};
use media_sync_daemon_config::Config;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Error type for watcher registration
#[derive(Debug, Error)]
pub enum WatchError {
    /// The notify backend refused to watch the project root
    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Registry of per-project folder watchers.
///
/// Watchers deliver raw events into a per-project channel whose single
/// consumer debounces them and runs the reconcile pass, then hands pending
/// video rows to the pipeline.
pub struct WatcherRegistry {
    db: Pool<Sqlite>,
    pipeline: Arc<Pipeline>,
    metrics: SharedMetrics,
    debounce_window: Duration,
    stability_wait: Duration,
    channel_capacity: usize,
    watches: Arc<RwLock<HashMap<i64, ProjectWatch>>>,
}

struct ProjectWatch {
    /// Held for the life of the watch; dropping it stops notify delivery.
    _watcher: RecommendedWatcher,
    consumer: JoinHandle<()>,
    tx: mpsc::Sender<WatchMessage>,
}

impl ProjectWatch {
    fn shutdown(self) {
        self.consumer.abort();
        // Dropping `_watcher` stops the notify stream.
    }
}

enum WatchMessage {
    /// Something under the root changed; a reconcile pass is due.
    Changed,
    /// The notify backend reported an error for this root.
    Error(String),
}

impl WatcherRegistry {
    pub fn new(
        db: Pool<Sqlite>,
        pipeline: Arc<Pipeline>,
        metrics: SharedMetrics,
        cfg: &Config,
    ) -> Self {
        Self {
            db,
            pipeline,
            metrics,
            debounce_window: Duration::from_millis(cfg.watcher.debounce_ms.max(1)),
            stability_wait: Duration::from_secs(cfg.watcher.stability_wait_secs),
            channel_capacity: cfg.watcher.channel_capacity.max(1),
            watches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start watching a project root and queue its initial reconcile pass.
    ///
    /// Starting an already watched project replaces its handle, so a project
    /// whose folder assignment moved can be restarted in place. Only the top
    /// level of the root is watched, matching what reconciliation reads.
    pub async fn start(&self, project_id: i64, root: &Path) -> Result<(), WatchError> {
        let mut watches = self.watches.write().await;

        let (tx, rx) = mpsc::channel::<WatchMessage>(self.channel_capacity);

        let event_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !is_relevant(&event.kind) {
                        return;
                    }
                    if let Err(err) = event_tx.blocking_send(WatchMessage::Changed) {
                        debug!("watch channel send failed: {}", err);
                    }
                }
                Err(err) => {
                    let _ = event_tx.blocking_send(WatchMessage::Error(err.to_string()));
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|source| WatchError::Notify {
            path: root.to_path_buf(),
            source,
        })?;

        watcher
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Notify {
                path: root.to_path_buf(),
                source,
            })?;

        info!(project_id, root = %root.display(), "watching project folder");

        let consumer = spawn_watch_loop(
            WatchContext {
                project_id,
                root: root.to_path_buf(),
                db: self.db.clone(),
                pipeline: Arc::clone(&self.pipeline),
                metrics: Arc::clone(&self.metrics),
                debounce_window: self.debounce_window,
                stability_wait: self.stability_wait,
            },
            rx,
        );

        // Queue the initial pass so files already on disk get reconciled
        let _ = tx.try_send(WatchMessage::Changed);

        if let Some(prior) = watches.insert(
            project_id,
            ProjectWatch {
                _watcher: watcher,
                consumer,
                tx,
            },
        ) {
            prior.shutdown();
        }

        Ok(())
    }

    /// Queue a reconcile pass for a watched project.
    ///
    /// Returns false when the project is not registered. A full channel
    /// counts as success since a wakeup is already queued.
    pub async fn request_sync(&self, project_id: i64) -> bool {
        let watches = self.watches.read().await;
        match watches.get(&project_id) {
            Some(watch) => {
                let _ = watch.tx.try_send(WatchMessage::Changed);
                true
            }
            None => false,
        }
    }

    /// Stop watching a project root.
    pub async fn stop(&self, project_id: i64) {
        if let Some(watch) = self.watches.write().await.remove(&project_id) {
            watch.shutdown();
            info!(project_id, "stopped watching project folder");
        }
    }

    /// Tear down all registered watchers.
    pub async fn stop_all(&self) {
        let mut guard = self.watches.write().await;
        let watches: Vec<_> = guard.drain().map(|(_, watch)| watch).collect();
        drop(guard);
        for watch in watches {
            watch.shutdown();
        }
    }

    /// Number of projects currently watched.
    pub async fn watch_count(&self) -> usize {
        self.watches.read().await.len()
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

struct WatchContext {
    project_id: i64,
    root: PathBuf,
    db: Pool<Sqlite>,
    pipeline: Arc<Pipeline>,
    metrics: SharedMetrics,
    debounce_window: Duration,
    stability_wait: Duration,
}

fn spawn_watch_loop(ctx: WatchContext, mut rx: mpsc::Receiver<WatchMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut dirty = false;

        loop {
            let msg = if !dirty {
                rx.recv().await
            } else {
                match timeout(ctx.debounce_window, rx.recv()).await {
                    Ok(msg) => msg,
                    Err(_) => {
                        run_sync_pass(&ctx).await;
                        dirty = false;
                        continue;
                    }
                }
            };

            let Some(msg) = msg else {
                if dirty {
                    run_sync_pass(&ctx).await;
                }
                break;
            };

            match msg {
                WatchMessage::Changed => dirty = true,
                WatchMessage::Error(error) => {
                    // The stream may have dropped events; rescan rather
                    // than trust the backlog
                    warn!(project_id = ctx.project_id, error = %error, "watcher error");
                    dirty = true;
                }
            }
        }
    })
}

/// Reconcile the folder once, then hand pending video rows to the pipeline.
async fn run_sync_pass(ctx: &WatchContext) {
    match reconcile::sync_folder(&ctx.db, ctx.project_id, &ctx.root).await {
        Ok(report) => {
            if !report.is_noop() {
                info!(
                    project_id = ctx.project_id,
                    added = report.added.len(),
                    updated = report.updated.len(),
                    removed = report.removed,
                    "folder reconciled"
                );
            }
            ctx.metrics
                .write()
                .await
                .record_sync(report.added.len(), report.removed);
            enqueue_pending(ctx).await;
        }
        Err(err) => {
            // Unreadable root; rows stand untouched until the next pass
            warn!(project_id = ctx.project_id, error = %err, "folder reconcile failed");
        }
    }
}

/// Queue every pending video row of this project into the pipeline.
///
/// Re-listing instead of tracking handoffs is safe: the pipeline claim
/// guard turns a double enqueue into an `AlreadyClaimed` no-op.
async fn enqueue_pending(ctx: &WatchContext) {
    let rows = match db::list_for_project(&ctx.db, ctx.project_id).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(project_id = ctx.project_id, error = %err, "listing project files failed");
            return;
        }
    };

    for row in rows {
        if row.transcoding_status != TranscodingStatus::Pending || !row.is_video() {
            continue;
        }
        spawn_file_task(ctx, row);
    }
}

/// Process one file in its own task: settle gate first, then the pipeline.
///
/// An unstable file stays pending; the write activity that made it unstable
/// also re-arms the debounce, so a later pass picks it up once quiet.
fn spawn_file_task(ctx: &WatchContext, row: MediaFile) {
    let db = ctx.db.clone();
    let pipeline = Arc::clone(&ctx.pipeline);
    let stability_wait = ctx.stability_wait;
    let project_id = ctx.project_id;

    tokio::spawn(async move {
        let path = PathBuf::from(&row.file_path);

        let initial_size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(err) => {
                debug!(project_id, file_id = %row.id, error = %err, "file vanished before processing");
                return;
            }
        };

        match stability::check_stability(&path, initial_size, stability_wait).await {
            Ok(StabilityResult::Stable) => {}
            Ok(StabilityResult::Unstable { current_size, .. }) => {
                debug!(
                    project_id,
                    file_id = %row.id,
                    current_size,
                    "file still growing, deferring"
                );
                if let Err(err) = db::update_file_size(&db, &row.id, current_size as i64).await {
                    warn!(project_id, file_id = %row.id, error = %err, "size update failed");
                }
                return;
            }
            Err(err) => {
                debug!(project_id, file_id = %row.id, error = %err, "stability check failed");
                return;
            }
        }

        match pipeline.process_file(&row.id).await {
            Ok(outcome) => {
                debug!(project_id, file_id = %row.id, ?outcome, "pipeline finished")
            }
            Err(PipelineError::Store(StoreError::NotFound(_))) => {
                // Row deleted between listing and claim
                debug!(project_id, file_id = %row.id, "file row removed before processing")
            }
            Err(err) => {
                error!(project_id, file_id = %row.id, error = %err, "pipeline error")
            }
        }
    });
}
