//! Reconciliation between a project folder on disk and its database rows.
//!
//! A sync pass lists the folder's top-level files and converges the database
//! onto what it finds: new paths are inserted as pending, vanished paths are
//! deleted, size changes are recorded. Listing failures abort the pass before
//! any row is touched, so a missing mount never reads as an empty folder.

use crate::db::{self, StoreError};
use crate::media::MediaFile;
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Name suffixes used by uploaders for files still being written.
const TEMP_SUFFIXES: &[&str] = &[".part", ".tmp", ".crdownload", ".download"];

/// Error type for sync passes.
#[derive(Debug, Error)]
pub enum FsSyncError {
    /// The folder could not be listed; no database row was touched.
    #[error("failed to list folder: {0}")]
    UnreadableFolder(#[from] walkdir::Error),

    /// Database error mid-pass.
    #[error("database error: {0}")]
    Store(#[from] StoreError),
}

/// One top-level file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Outcome of one sync pass over a project folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Row ids inserted for newly discovered files.
    pub added: Vec<String>,
    /// Row ids whose recorded size changed.
    pub updated: Vec<String>,
    /// Rows deleted because their file vanished.
    pub removed: usize,
    /// Rows matching disk exactly.
    pub unchanged: usize,
}

impl SyncReport {
    /// True when the pass found nothing to change.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed == 0
    }
}

/// Whether a directory entry name should be ignored by reconciliation.
///
/// Hidden files and uploader temp files are invisible to the sync; they
/// become real once renamed into place. Transcoded outputs are skipped
/// too, since they sit next to their source and are tracked through the
/// source row, not a row of their own.
fn is_ignored_name(name: &str) -> bool {
    if name.starts_with('.') {
        return true;
    }
    if crate::transcode::is_artifact_name(name) {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    TEMP_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// List the top-level regular files of `root`, sorted by name.
///
/// Subdirectories and their contents are out of scope for reconciliation.
/// Any walk error aborts the listing.
pub fn list_top_level(root: &Path) -> Result<Vec<DiskEntry>, FsSyncError> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_ignored_name(&name) {
            continue;
        }

        let metadata = entry.metadata()?;
        entries.push(DiskEntry {
            path: entry.into_path(),
            size_bytes: metadata.len(),
        });
    }

    Ok(entries)
}

/// Run one sync pass for a project folder.
///
/// Convergent and idempotent: running it again with no filesystem change
/// reports zero added, updated, and removed. Callers serialize passes per
/// project; should passes overlap anyway, the unique path index fails the
/// losing insert instead of duplicating a row.
pub async fn sync_folder(
    db: &Pool<Sqlite>,
    project_id: i64,
    root: &Path,
) -> Result<SyncReport, FsSyncError> {
    let disk = list_top_level(root)?;
    let known = db::list_for_project(db, project_id).await?;

    let disk_sizes: HashMap<String, u64> = disk
        .iter()
        .map(|e| (e.path.to_string_lossy().into_owned(), e.size_bytes))
        .collect();

    let mut report = SyncReport::default();

    for row in &known {
        match disk_sizes.get(&row.file_path) {
            None => {
                db::delete_by_path(db, project_id, &row.file_path).await?;
                report.removed += 1;
            }
            Some(&size) if size as i64 != row.file_size => {
                db::update_file_size(db, &row.id, size as i64).await?;
                report.updated.push(row.id.clone());
            }
            Some(_) => {
                report.unchanged += 1;
            }
        }
    }

    let known_paths: HashSet<&str> = known.iter().map(|r| r.file_path.as_str()).collect();

    for entry in &disk {
        let path_str = entry.path.to_string_lossy();
        if known_paths.contains(path_str.as_ref()) {
            continue;
        }

        let file = MediaFile::discovered(project_id, &entry.path, entry.size_bytes);
        let id = file.id.clone();
        db::insert_media_file(db, &file).await?;
        report.added.push(id);
    }

    Ok(report)
}
