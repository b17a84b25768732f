//! Metrics for the media sync daemon.
//!
//! Provides structs for in-flight transcode progress, system metrics, and
//! snapshots with JSON serialization support.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Progress of one in-flight transcode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeMetrics {
    pub file_id: String,
    pub project_id: i64,
    pub filename: String,
    /// Seconds of output written so far
    pub seconds_done: f64,
    /// Completion percentage when the source duration is known
    pub percent: Option<f64>,
}

/// Host resource usage sampled at snapshot time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete metrics snapshot including transcodes, system, and aggregate stats
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub active_transcodes: Vec<TranscodeMetrics>,
    pub system: SystemMetrics,
    /// Rows currently pending across all projects
    pub queue_len: usize,
    pub running_transcodes: usize,
    /// Rows inserted by reconciliation since daemon start
    pub files_added: u64,
    /// Rows deleted by reconciliation since daemon start
    pub files_removed: u64,
    pub completed_files: u64,
    pub failed_files: u64,
}

/// Snapshot handle shared between the pipeline and the HTTP endpoint.
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

impl MetricsSnapshot {
    /// Insert or replace the entry for an in-flight transcode.
    pub fn upsert_transcode(&mut self, entry: TranscodeMetrics) {
        if let Some(existing) = self
            .active_transcodes
            .iter_mut()
            .find(|t| t.file_id == entry.file_id)
        {
            *existing = entry;
        } else {
            self.active_transcodes.push(entry);
        }
        self.running_transcodes = self.active_transcodes.len();
    }

    /// Update progress for an in-flight transcode, if still tracked.
    pub fn set_transcode_progress(
        &mut self,
        file_id: &str,
        seconds_done: f64,
        percent: Option<f64>,
    ) {
        if let Some(entry) = self
            .active_transcodes
            .iter_mut()
            .find(|t| t.file_id == file_id)
        {
            entry.seconds_done = seconds_done;
            entry.percent = percent;
        }
    }

    /// Drop the entry for a transcode that reached a terminal state.
    pub fn remove_transcode(&mut self, file_id: &str) {
        self.active_transcodes.retain(|t| t.file_id != file_id);
        self.running_transcodes = self.active_transcodes.len();
    }

    /// Fold one sync pass into the aggregate counters.
    pub fn record_sync(&mut self, added: usize, removed: usize) {
        self.files_added += added as u64;
        self.files_removed += removed as u64;
    }

    pub fn record_completed(&mut self) {
        self.completed_files += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed_files += 1;
    }
}

/// Fresh shared snapshot with all counters zeroed.
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

/// Sample CPU, memory, and load averages via sysinfo.
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let mem_usage_percent = match sys.total_memory() {
        0 => 0.0,
        total => (sys.used_memory() as f64 / total as f64 * 100.0) as f32,
    };

    let load = System::load_average();

    SystemMetrics {
        cpu_usage_percent: sys.global_cpu_usage(),
        mem_usage_percent,
        load_avg_1: load.one as f32,
        load_avg_5: load.five as f32,
        load_avg_15: load.fifteen as f32,
    }
}
