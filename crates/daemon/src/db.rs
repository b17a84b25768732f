//! SQLite persistence for media file records.
//!
//! All access goes through the shared connection pool. Status transitions are
//! single guarded UPDATEs so concurrent workers cannot double-claim a row.

use crate::media::{MediaFile, TranscodingStatus};
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use thiserror::Error;

/// Errors from the media store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("media file not found: {0}")]
    NotFound(String),
}

/// Per-status row counts, reported by the metrics endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub complete: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.complete + self.failed
    }
}

/// Open (creating if missing) the database at `path` and put it in WAL mode.
pub async fn connect(path: &Path) -> Result<Pool<Sqlite>, StoreError> {
    let db_url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    Ok(pool)
}

/// Create the media_files table and its indexes if they do not exist.
///
/// The unique index on (project_id, file_path) is what keeps reconciliation
/// from ever producing duplicate rows for one on-disk file.
pub async fn init_schema(db: &Pool<Sqlite>) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_files (
            id TEXT PRIMARY KEY,
            project_id INTEGER NOT NULL,
            filename TEXT NOT NULL,
            original_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            transcoded_file_path TEXT,
            file_size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            duration REAL,
            folder TEXT NOT NULL DEFAULT 'inbound',
            transcoding_status TEXT NOT NULL DEFAULT 'pending',
            transcoding_error TEXT,
            transcoding_attempts INTEGER NOT NULL DEFAULT 0,
            uploaded_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_media_files_project_path
        ON media_files (project_id, file_path)
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_media_files_status
        ON media_files (transcoding_status)
        "#,
    )
    .execute(db)
    .await?;

    Ok(())
}

/// Insert a new media file record.
///
/// Fails if a row for the same (project_id, file_path) already exists.
pub async fn insert_media_file(db: &Pool<Sqlite>, file: &MediaFile) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO media_files (
            id, project_id, filename, original_name, file_path,
            transcoded_file_path, file_size, mime_type, duration, folder,
            transcoding_status, transcoding_error, transcoding_attempts,
            uploaded_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&file.id)
    .bind(file.project_id)
    .bind(&file.filename)
    .bind(&file.original_name)
    .bind(&file.file_path)
    .bind(&file.transcoded_file_path)
    .bind(file.file_size)
    .bind(&file.mime_type)
    .bind(file.duration)
    .bind(file.folder)
    .bind(file.transcoding_status)
    .bind(&file.transcoding_error)
    .bind(file.transcoding_attempts)
    .bind(file.uploaded_at)
    .bind(file.updated_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Get a single media file by ID.
pub async fn get_media_file(db: &Pool<Sqlite>, id: &str) -> Result<MediaFile, StoreError> {
    let file = sqlx::query_as::<_, MediaFile>(
        r#"
        SELECT id, project_id, filename, original_name, file_path,
               transcoded_file_path, file_size, mime_type, duration, folder,
               transcoding_status, transcoding_error, transcoding_attempts,
               uploaded_at, updated_at
        FROM media_files
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    Ok(file)
}

/// Look up the record tracking `file_path` within a project, if any.
pub async fn find_by_path(
    db: &Pool<Sqlite>,
    project_id: i64,
    file_path: &str,
) -> Result<Option<MediaFile>, StoreError> {
    let file = sqlx::query_as::<_, MediaFile>(
        r#"
        SELECT id, project_id, filename, original_name, file_path,
               transcoded_file_path, file_size, mime_type, duration, folder,
               transcoding_status, transcoding_error, transcoding_attempts,
               uploaded_at, updated_at
        FROM media_files
        WHERE project_id = ? AND file_path = ?
        "#,
    )
    .bind(project_id)
    .bind(file_path)
    .fetch_optional(db)
    .await?;

    Ok(file)
}

/// All records for a project, ordered by path for stable reconciliation.
pub async fn list_for_project(
    db: &Pool<Sqlite>,
    project_id: i64,
) -> Result<Vec<MediaFile>, StoreError> {
    let files = sqlx::query_as::<_, MediaFile>(
        r#"
        SELECT id, project_id, filename, original_name, file_path,
               transcoded_file_path, file_size, mime_type, duration, folder,
               transcoding_status, transcoding_error, transcoding_attempts,
               uploaded_at, updated_at
        FROM media_files
        WHERE project_id = ?
        ORDER BY file_path ASC
        "#,
    )
    .bind(project_id)
    .fetch_all(db)
    .await?;

    Ok(files)
}

/// All records currently in `status`, across projects.
pub async fn list_by_status(
    db: &Pool<Sqlite>,
    status: TranscodingStatus,
) -> Result<Vec<MediaFile>, StoreError> {
    let files = sqlx::query_as::<_, MediaFile>(
        r#"
        SELECT id, project_id, filename, original_name, file_path,
               transcoded_file_path, file_size, mime_type, duration, folder,
               transcoding_status, transcoding_error, transcoding_attempts,
               uploaded_at, updated_at
        FROM media_files
        WHERE transcoding_status = ?
        ORDER BY uploaded_at ASC
        "#,
    )
    .bind(status)
    .fetch_all(db)
    .await?;

    Ok(files)
}

/// Delete the record for a path that vanished from disk.
///
/// Returns true if a row was removed.
pub async fn delete_by_path(
    db: &Pool<Sqlite>,
    project_id: i64,
    file_path: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM media_files WHERE project_id = ? AND file_path = ?")
        .bind(project_id)
        .bind(file_path)
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a size change observed by the reconciler.
pub async fn update_file_size(db: &Pool<Sqlite>, id: &str, size: i64) -> Result<(), StoreError> {
    sqlx::query("UPDATE media_files SET file_size = ?, updated_at = ? WHERE id = ?")
        .bind(size)
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;

    Ok(())
}

/// Try to move a row into `processing`.
///
/// The WHERE clause only matches pending or failed rows, so a row already
/// being worked on cannot be claimed twice. Returns false when the guard
/// matched nothing.
pub async fn claim_for_processing(db: &Pool<Sqlite>, id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE media_files
        SET transcoding_status = 'processing', updated_at = ?
        WHERE id = ? AND transcoding_status IN ('pending', 'failed')
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Terminal transition to `complete` in one UPDATE.
///
/// `transcoded_path` is Some only when a normalization pass produced an
/// output file; a passthrough completion stores NULL.
pub async fn mark_complete(
    db: &Pool<Sqlite>,
    id: &str,
    transcoded_path: Option<&str>,
    duration: Option<f64>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE media_files
        SET transcoding_status = 'complete',
            transcoded_file_path = ?,
            duration = ?,
            transcoding_error = NULL,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(transcoded_path)
    .bind(duration)
    .bind(Utc::now())
    .bind(id)
    .execute(db)
    .await?;

    Ok(())
}

/// Terminal transition to `failed` in one UPDATE.
///
/// The attempt counter moves in the same statement, so it increments exactly
/// once per failed execution no matter how the caller got here.
pub async fn mark_failed(db: &Pool<Sqlite>, id: &str, error: &str) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE media_files
        SET transcoding_status = 'failed',
            transcoding_error = ?,
            transcoding_attempts = transcoding_attempts + 1,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(Utc::now())
    .bind(id)
    .execute(db)
    .await?;

    Ok(())
}

/// Return rows stranded in `processing` by a previous run to `pending`.
///
/// Attempt counters are left alone; an interrupted execution is not a failed
/// one. Returns the number of rows recovered.
pub async fn reset_stale_processing(db: &Pool<Sqlite>) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE media_files
        SET transcoding_status = 'pending', updated_at = ?
        WHERE transcoding_status = 'processing'
        "#,
    )
    .bind(Utc::now())
    .execute(db)
    .await?;

    Ok(result.rows_affected())
}

/// Per-status row counts across all projects.
pub async fn count_by_status(db: &Pool<Sqlite>) -> Result<StatusCounts, StoreError> {
    let rows = sqlx::query_as::<_, (TranscodingStatus, i64)>(
        "SELECT transcoding_status, COUNT(*) FROM media_files GROUP BY transcoding_status",
    )
    .fetch_all(db)
    .await?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        match status {
            TranscodingStatus::Pending => counts.pending = count,
            TranscodingStatus::Processing => counts.processing = count,
            TranscodingStatus::Complete => counts.complete = count,
            TranscodingStatus::Failed => counts.failed = count,
        }
    }

    Ok(counts)
}
