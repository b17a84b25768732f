//! Media Sync Daemon
//!
//! Background service that watches project media folders, reconciles them
//! with the media database, and normalizes video files for streaming.

pub mod concurrency;
pub mod daemon;
pub mod db;
pub mod decision;
pub mod media;
pub mod metrics;
pub mod metrics_server;
pub mod mime;
pub mod pipeline;
pub mod probe;
pub mod reconcile;
pub mod stability;
pub mod startup;
pub mod transcode;
pub mod watcher;

pub use media_sync_daemon_config as config;
pub use media_sync_daemon_config::Config;

pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use daemon::{Daemon, DaemonError};
pub use db::{StatusCounts, StoreError};
pub use decision::needs_transcoding;
pub use media::{FolderClass, MediaFile, TranscodingStatus};
pub use metrics::{
    collect_system_metrics, new_shared_metrics, MetricsSnapshot, SharedMetrics, SystemMetrics,
    TranscodeMetrics,
};
pub use metrics_server::{create_metrics_router, run_metrics_server, ServerError};
pub use pipeline::{Pipeline, PipelineError, ProcessOutcome};
pub use probe::{probe_file, ProbeError, ProbeResult};
pub use reconcile::{sync_folder, FsSyncError, SyncReport};
pub use stability::{check_stability, StabilityResult};
pub use startup::{
    check_database_dir, check_ffmpeg_version, check_tool_available, parse_ffmpeg_version,
    run_startup_checks, StartupError,
};
pub use transcode::{
    build_transcode_args, output_path_for, run_transcode, transcode_deadline, TranscodeError,
    TranscodeParams, TranscodeProgress,
};
pub use watcher::{WatchError, WatcherRegistry};
