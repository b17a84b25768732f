//! Startup checks for the media sync daemon.
//!
//! Preflight verification that the configured external tools exist before
//! any folder is watched or any file claimed:
//! - ffprobe availability check
//! - ffmpeg availability and version check
//! - database directory check

use crate::config::Config;
use std::fs;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Oldest ffmpeg major version the delivery profile is known to work with.
pub const MIN_FFMPEG_MAJOR: u32 = 4;

/// Preflight failures that abort daemon startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{name} not available: {message}")]
    ToolUnavailable { name: String, message: String },

    #[error("FFmpeg version requirement not met: {0}")]
    FfmpegVersion(String),

    #[error("database directory {path} is not usable: {message}")]
    DatabaseDir { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check that a tool runs by invoking `<tool> -version`.
///
/// Both ffmpeg and ffprobe answer `-version` with exit code 0, so this
/// doubles as a sanity check that the configured path points at the right
/// kind of binary.
pub fn check_tool_available(path: &Path, name: &str) -> Result<(), StartupError> {
    let output = Command::new(path).arg("-version").output().map_err(|e| {
        StartupError::ToolUnavailable {
            name: name.to_string(),
            message: format!("{} -version failed; is it installed and in PATH? Error: {}", name, e),
        }
    })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            name: name.to_string(),
            message: format!("{} -version exited with {}", name, output.status),
        });
    }

    Ok(())
}

/// Parse an FFmpeg version banner and extract the major version number.
///
/// Handles the formats in the wild:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed git builds: "ffmpeg version n6.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    for line in version_output.lines() {
        let lower = line.to_lowercase();
        let Some(rest) = lower.strip_prefix("ffmpeg version") else {
            continue;
        };

        let token = rest.split_whitespace().next()?;
        let token = token.strip_prefix('n').unwrap_or(token);

        // Major is everything up to the first '.' or '-'
        let end = token.find(['.', '-']).unwrap_or(token.len());
        return token[..end].parse().ok();
    }

    None
}

/// Check that the configured ffmpeg meets [`MIN_FFMPEG_MAJOR`].
pub fn check_ffmpeg_version(path: &Path) -> Result<(), StartupError> {
    let output = Command::new(path)
        .arg("-version")
        .output()
        .map_err(|e| StartupError::FfmpegVersion(format!("could not run ffmpeg -version: {}", e)))?;

    if !output.status.success() {
        return Err(StartupError::FfmpegVersion(format!(
            "ffmpeg -version exited with {}",
            output.status
        )));
    }

    let banner = String::from_utf8_lossy(&output.stdout);
    match parse_ffmpeg_version(&banner) {
        Some(major) if major >= MIN_FFMPEG_MAJOR => Ok(()),
        Some(major) => Err(StartupError::FfmpegVersion(format!(
            "FFmpeg {}.x or newer required, got: {}",
            MIN_FFMPEG_MAJOR, major
        ))),
        None => Err(StartupError::FfmpegVersion(format!(
            "unrecognized version banner: {}",
            banner.lines().next().unwrap_or("(empty)")
        ))),
    }
}

/// Check that the directory holding the database file exists, creating it
/// when missing.
pub fn check_database_dir(database: &Path) -> Result<(), StartupError> {
    let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) else {
        // Bare filename resolves against the working directory
        return Ok(());
    };

    if parent.is_dir() {
        return Ok(());
    }

    fs::create_dir_all(parent).map_err(|e| StartupError::DatabaseDir {
        path: parent.display().to_string(),
        message: e.to_string(),
    })
}

/// All preflight checks, in order: ffprobe, ffmpeg version, then the
/// database directory.
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    check_tool_available(&cfg.paths.ffprobe, "ffprobe")?;
    check_ffmpeg_version(&cfg.paths.ffmpeg)?;
    check_database_dir(&cfg.paths.database)?;
    Ok(())
}
