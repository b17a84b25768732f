//! Transcode pipeline orchestration.
//!
//! `process_file` drives one media file from claim to terminal status:
//! claim the row, probe it, decide whether normalization is needed, run the
//! encoder under a global permit, and record the outcome. Probe and encoder
//! faults are contained as failed rows; only database errors propagate.

use crate::config::Config;
use crate::db::{self, StoreError};
use crate::decision::needs_transcoding;
use crate::media::TranscodingStatus;
use crate::metrics::{SharedMetrics, TranscodeMetrics};
use crate::probe;
use crate::transcode::{self, TranscodeParams};
use crate::ConcurrencyPlan;
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Database error while claiming or recording
    #[error("database error: {0}")]
    Store(#[from] StoreError),

    /// The retry entry point refused a file that has used up its attempts
    #[error("media file {id} has failed {attempts} times; retry refused without force")]
    RetryExhausted { id: String, attempts: i64 },
}

/// How one `process_file` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Another worker holds the file; nothing was done.
    AlreadyClaimed,
    /// The file already satisfies the delivery profile; completed as-is.
    CompletedPassthrough,
    /// Normalization ran and the output path was persisted.
    CompletedTranscoded { output_path: PathBuf },
    /// Probe or encoder failed; the error text was persisted on the row.
    Failed { error: String },
}

/// Pipeline executor that drives media files to terminal status with
/// encoder concurrency limited by a semaphore.
pub struct Pipeline {
    db: Pool<Sqlite>,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    /// Semaphore bounding concurrent ffmpeg processes across all projects
    semaphore: Arc<Semaphore>,
    max_attempts: u32,
    stuck_timeout_floor_secs: u64,
    stuck_timeout_factor: f64,
    metrics: SharedMetrics,
}

impl Pipeline {
    /// Create a new Pipeline
    ///
    /// # Arguments
    /// * `db` - Connection pool for the media database
    /// * `cfg` - Daemon configuration (tool paths and limits)
    /// * `plan` - Concurrency plan determining the encoder cap
    /// * `metrics` - Shared metrics state for progress reporting
    pub fn new(db: Pool<Sqlite>, cfg: &Config, plan: ConcurrencyPlan, metrics: SharedMetrics) -> Self {
        let permits = plan.max_concurrent_transcodes as usize;
        Self {
            db,
            ffmpeg: cfg.paths.ffmpeg.clone(),
            ffprobe: cfg.paths.ffprobe.clone(),
            semaphore: Arc::new(Semaphore::new(permits)),
            max_attempts: cfg.limits.max_attempts,
            stuck_timeout_floor_secs: cfg.limits.stuck_timeout_floor_secs,
            stuck_timeout_factor: cfg.limits.stuck_timeout_factor,
            metrics,
        }
    }

    /// Get the number of available encoder slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquire an encoder slot, waiting until one is free
    pub async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore should not be closed")
    }

    /// Try to acquire an encoder slot without waiting
    pub fn try_acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Hand a file to the pipeline without waiting for the outcome.
    ///
    /// Entry point for callers that insert rows directly (the upload API)
    /// and only need the status field to eventually reflect the result.
    pub fn enqueue(self: &Arc<Self>, file_id: String) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = pipeline.process_file(&file_id).await {
                warn!(file_id, error = %err, "enqueued file could not be processed");
            }
        })
    }

    /// Drive one media file from claim to terminal status.
    ///
    /// The guarded claim makes this safe to call from multiple places for
    /// the same id: exactly one caller proceeds, the rest observe
    /// `AlreadyClaimed`. Every path past the claim ends in a terminal row
    /// UPDATE, so no file is left in `processing`.
    pub async fn process_file(&self, file_id: &str) -> Result<ProcessOutcome, PipelineError> {
        let file = db::get_media_file(&self.db, file_id).await?;

        if !db::claim_for_processing(&self.db, file_id).await? {
            debug!(
                file_id,
                status = %file.transcoding_status,
                "file not claimable, skipping"
            );
            return Ok(ProcessOutcome::AlreadyClaimed);
        }

        info!(file_id, path = %file.file_path, "processing media file");

        let input_path = PathBuf::from(&file.file_path);

        let ffprobe = self.ffprobe.clone();
        let probe_input = input_path.clone();
        let probed =
            tokio::task::spawn_blocking(move || probe::probe_file(&ffprobe, &probe_input)).await;

        let probe_result = match probed {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                return self.fail_file(file_id, err.to_string()).await;
            }
            Err(join_err) => {
                return self
                    .fail_file(file_id, format!("probe task panicked: {}", join_err))
                    .await;
            }
        };

        let duration = probe_result.duration_secs();

        if !needs_transcoding(&probe_result) {
            db::mark_complete(&self.db, file_id, None, duration).await?;
            self.metrics.write().await.record_completed();
            info!(file_id, "already within the delivery profile, marked complete");
            return Ok(ProcessOutcome::CompletedPassthrough);
        }

        let output_path = transcode::output_path_for(&input_path);
        let params = TranscodeParams {
            input_path,
            output_path: output_path.clone(),
            duration_secs: duration,
            source_fps: probe_result.video_fps(),
        };
        let deadline = transcode::transcode_deadline(
            duration,
            self.stuck_timeout_floor_secs,
            self.stuck_timeout_factor,
        );

        let _permit = self.acquire_permit().await;

        self.metrics.write().await.upsert_transcode(TranscodeMetrics {
            file_id: file_id.to_string(),
            project_id: file.project_id,
            filename: file.filename.clone(),
            seconds_done: 0.0,
            percent: duration.map(|_| 0.0),
        });

        let metrics = Arc::clone(&self.metrics);
        let progress_id = file_id.to_string();
        let result = transcode::run_transcode(&self.ffmpeg, &params, deadline, |progress| {
            // Dropping a sample under lock contention is fine
            if let Ok(mut snapshot) = metrics.try_write() {
                snapshot.set_transcode_progress(
                    &progress_id,
                    progress.seconds_done,
                    progress.percent,
                );
            }
        })
        .await;

        self.metrics.write().await.remove_transcode(file_id);

        match result {
            Ok(()) => {
                let output_str = output_path.to_string_lossy().into_owned();
                db::mark_complete(&self.db, file_id, Some(&output_str), duration).await?;
                self.metrics.write().await.record_completed();
                info!(file_id, output = %output_str, "transcode complete");
                Ok(ProcessOutcome::CompletedTranscoded { output_path })
            }
            Err(err) => {
                // Drop any partial output before recording the failure
                let _ = tokio::fs::remove_file(&output_path).await;
                self.fail_file(file_id, err.to_string()).await
            }
        }
    }

    /// Re-queue a failed file through the pipeline.
    ///
    /// Refused once the attempt budget is used up, unless `force` is set.
    pub async fn retry_file(
        &self,
        file_id: &str,
        force: bool,
    ) -> Result<ProcessOutcome, PipelineError> {
        let file = db::get_media_file(&self.db, file_id).await?;

        if !force
            && file.transcoding_status == TranscodingStatus::Failed
            && file.transcoding_attempts >= i64::from(self.max_attempts)
        {
            return Err(PipelineError::RetryExhausted {
                id: file_id.to_string(),
                attempts: file.transcoding_attempts,
            });
        }

        self.process_file(file_id).await
    }

    /// Record a terminal failure and report it as a contained outcome.
    async fn fail_file(
        &self,
        file_id: &str,
        error: String,
    ) -> Result<ProcessOutcome, PipelineError> {
        warn!(file_id, error = %error, "media file failed");
        db::mark_failed(&self.db, file_id, &error).await?;
        self.metrics.write().await.record_failed();
        Ok(ProcessOutcome::Failed { error })
    }
}
