//! Media file records and the transcoding state machine.
//!
//! One `MediaFile` row exists per on-disk asset tracked by the daemon.
//! Transcoding status walks pending -> processing -> {complete, failed};
//! failed re-enters processing only through the explicit retry entry point.

use crate::mime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Transcoding status of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TranscodingStatus {
    /// Discovered or uploaded, not yet examined.
    Pending,
    /// A worker holds the file and is probing or encoding it.
    Processing,
    /// Terminal: normalized (transcoded path set) or accepted as-is (path null).
    Complete,
    /// Terminal: probe or encode failed; error text recorded.
    Failed,
}

impl Default for TranscodingStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TranscodingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscodingStatus::Pending => write!(f, "pending"),
            TranscodingStatus::Processing => write!(f, "processing"),
            TranscodingStatus::Complete => write!(f, "complete"),
            TranscodingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Folder classification of a media file within its project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FolderClass {
    /// Delivered into the watched folder by clients or the storage mount.
    Inbound,
    /// Produced for the client by the studio (assigned by the upload API).
    Outbound,
}

impl Default for FolderClass {
    fn default() -> Self {
        Self::Inbound
    }
}

impl std::fmt::Display for FolderClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FolderClass::Inbound => write!(f, "inbound"),
            FolderClass::Outbound => write!(f, "outbound"),
        }
    }
}

/// Persisted record for one tracked on-disk media asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct MediaFile {
    /// Unique identifier (UUID).
    pub id: String,
    /// Owning project in the host application.
    pub project_id: i64,
    /// Current on-disk basename.
    pub filename: String,
    /// Name the file carried when first uploaded or discovered.
    pub original_name: String,
    /// Absolute path; the reconciler and watcher key on this.
    pub file_path: String,
    /// Set only when normalization ran to completion.
    pub transcoded_file_path: Option<String>,
    /// Size in bytes at the last reconciliation.
    pub file_size: i64,
    /// MIME type from the extension table.
    pub mime_type: String,
    /// Probed duration in seconds, null until probed.
    pub duration: Option<f64>,
    /// Inbound or outbound classification.
    pub folder: FolderClass,
    /// Current pipeline state.
    pub transcoding_status: TranscodingStatus,
    /// Diagnostic text from the last failed probe or encode.
    pub transcoding_error: Option<String>,
    /// Failed execution attempts so far; never decreases.
    pub transcoding_attempts: i64,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaFile {
    /// Builds a record for a file the reconciler discovered in a watched
    /// folder. Status starts pending with no probe data.
    pub fn discovered(project_id: i64, path: &Path, size_bytes: u64) -> Self {
        let now = Utc::now();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            original_name: filename.clone(),
            filename,
            file_path: path.to_string_lossy().into_owned(),
            transcoded_file_path: None,
            file_size: size_bytes as i64,
            mime_type: mime::mime_for_path(path).to_string(),
            duration: None,
            folder: FolderClass::Inbound,
            transcoding_status: TranscodingStatus::Pending,
            transcoding_error: None,
            transcoding_attempts: 0,
            uploaded_at: now,
            updated_at: now,
        }
    }

    /// Whether this file classifies as video and belongs in the pipeline.
    pub fn is_video(&self) -> bool {
        mime::is_video_mime(&self.mime_type)
    }

    /// Check if the file is in a terminal state (complete or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.transcoding_status,
            TranscodingStatus::Complete | TranscodingStatus::Failed
        )
    }

    /// Check if the file is queued or being worked on.
    pub fn is_active(&self) -> bool {
        matches!(
            self.transcoding_status,
            TranscodingStatus::Pending | TranscodingStatus::Processing
        )
    }
}
