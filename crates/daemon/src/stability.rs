//! Stability checking for files that may still be uploading.
//!
//! A file that just appeared in a watched folder may still be copied into
//! place by the uploader or the storage mount. Before reconciling it we
//! verify its size holds steady across a wait window; an unstable file
//! re-arms the debounce instead of entering the pipeline.

use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

/// Outcome of sampling a file's size twice across the wait window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    Stable,
    Unstable {
        /// Size at the first observation.
        initial_size: u64,
        /// Size at the second observation.
        current_size: u64,
    },
}

/// Wait out `wait`, then re-stat the file and compare against the size it
/// had when first observed.
///
/// A deleted file surfaces as a NotFound error, which reconciliation
/// treats as a removal.
pub async fn check_stability(
    path: &Path,
    initial_size: u64,
    wait: Duration,
) -> Result<StabilityResult, std::io::Error> {
    sleep(wait).await;
    let current_size = tokio::fs::metadata(path).await?.len();
    Ok(judge_sizes(initial_size, current_size))
}

/// Pure size comparison, split out so the property tests can hit it
/// without touching the filesystem.
#[inline]
pub fn judge_sizes(initial_size: u64, current_size: u64) -> StabilityResult {
    if initial_size == current_size {
        return StabilityResult::Stable;
    }
    StabilityResult::Unstable {
        initial_size,
        current_size,
    }
}
