//! Daemon configuration: TOML file plus MEDIA_SYNC_* env overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// What can go wrong while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not valid TOML for this schema.
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "could not read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "could not parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// External tool and storage paths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Path to the ffmpeg binary (resolved via PATH if bare)
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    /// Path to the ffprobe binary (resolved via PATH if bare)
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_database() -> PathBuf {
    PathBuf::from("media-sync.db")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            database: default_database(),
        }
    }
}

/// Folder watching and debounce configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatcherConfig {
    /// Quiet period after the last filesystem event before reconciling (milliseconds)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Wait between size samples when checking that a file is no longer growing (seconds)
    #[serde(default = "default_stability_wait_secs")]
    pub stability_wait_secs: u64,
    /// Capacity of the per-project event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_stability_wait_secs() -> u64 {
    2
}

fn default_channel_capacity() -> usize {
    512
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            stability_wait_secs: default_stability_wait_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Transcoding limits and retry policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    /// Maximum encoder processes running at once across all projects (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_transcodes: u32,
    /// Failed executions after which the explicit retry entry point refuses a file
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Minimum deadline granted to any encoder run (seconds)
    #[serde(default = "default_stuck_timeout_floor_secs")]
    pub stuck_timeout_floor_secs: u64,
    /// Deadline multiplier applied to the probed input duration
    #[serde(default = "default_stuck_timeout_factor")]
    pub stuck_timeout_factor: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_stuck_timeout_floor_secs() -> u64 {
    600
}

fn default_stuck_timeout_factor() -> f64 {
    10.0
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transcodes: 0,
            max_attempts: default_max_attempts(),
            stuck_timeout_floor_secs: default_stuck_timeout_floor_secs(),
            stuck_timeout_factor: default_stuck_timeout_factor(),
        }
    }
}

/// Metrics HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    /// Serve the metrics endpoint (default true)
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Bind address for the metrics server
    #[serde(default = "default_metrics_bind")]
    pub bind: String,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_bind() -> String {
    "127.0.0.1:9867".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            bind: default_metrics_bind(),
        }
    }
}

/// One watched project folder assignment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Project id in the host application's database
    pub id: i64,
    /// Watched root directory for this project
    pub root: PathBuf,
}

/// Top-level configuration, one section per concern.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Project id to watched-root assignments consumed at startup
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

impl Config {
    /// Read and parse a TOML config file. Missing sections and fields
    /// fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration out of a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Fold MEDIA_SYNC_* environment variables over the file values:
    ///
    /// - MEDIA_SYNC_FFMPEG -> paths.ffmpeg
    /// - MEDIA_SYNC_FFPROBE -> paths.ffprobe
    /// - MEDIA_SYNC_DATABASE -> paths.database
    /// - MEDIA_SYNC_DEBOUNCE_MS -> watcher.debounce_ms
    /// - MEDIA_SYNC_STABILITY_WAIT_SECS -> watcher.stability_wait_secs
    /// - MEDIA_SYNC_MAX_CONCURRENT_TRANSCODES -> limits.max_concurrent_transcodes
    /// - MEDIA_SYNC_MAX_ATTEMPTS -> limits.max_attempts
    /// - MEDIA_SYNC_METRICS_ENABLED -> metrics.enabled
    /// - MEDIA_SYNC_METRICS_BIND -> metrics.bind
    ///
    /// Values that fail to parse are ignored and the file value stands.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MEDIA_SYNC_FFMPEG") {
            if !val.is_empty() {
                self.paths.ffmpeg = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("MEDIA_SYNC_FFPROBE") {
            if !val.is_empty() {
                self.paths.ffprobe = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("MEDIA_SYNC_DATABASE") {
            if !val.is_empty() {
                self.paths.database = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("MEDIA_SYNC_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.watcher.debounce_ms = ms;
            }
        }

        if let Ok(val) = env::var("MEDIA_SYNC_STABILITY_WAIT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.watcher.stability_wait_secs = secs;
            }
        }

        if let Ok(val) = env::var("MEDIA_SYNC_MAX_CONCURRENT_TRANSCODES") {
            if let Ok(n) = val.parse::<u32>() {
                self.limits.max_concurrent_transcodes = n;
            }
        }

        if let Ok(val) = env::var("MEDIA_SYNC_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse::<u32>() {
                self.limits.max_attempts = n;
            }
        }

        if let Ok(val) = env::var("MEDIA_SYNC_METRICS_ENABLED") {
            // Truthy spellings accepted from launcher scripts
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.metrics.enabled = true,
                "false" | "0" | "no" => self.metrics.enabled = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("MEDIA_SYNC_METRICS_BIND") {
            if !val.is_empty() {
                self.metrics.bind = val;
            }
        }
    }

    /// The loading path the daemon uses: file first, env on top.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
