//! Transcode decision logic.
//!
//! Decides whether a probed media file must be normalized for streaming.
//! The decision is a pure function of the probe result so reprocessing an
//! already-normalized file is a no-op.

use crate::probe::ProbeResult;

/// Bitrate ceiling in bits per second for sources wider than [`WIDE_WIDTH_THRESHOLD`].
pub const BITRATE_CEILING_WIDE_BPS: u64 = 40_000_000;

/// Bitrate ceiling in bits per second for sources at or below [`WIDE_WIDTH_THRESHOLD`].
pub const BITRATE_CEILING_STANDARD_BPS: u64 = 20_000_000;

/// Width above which the wide bitrate ceiling applies.
pub const WIDE_WIDTH_THRESHOLD: u32 = 1920;

/// The acceptable bitrate ceiling for a source of the given width.
pub fn bitrate_ceiling_bps(width: u32) -> u64 {
    if width > WIDE_WIDTH_THRESHOLD {
        BITRATE_CEILING_WIDE_BPS
    } else {
        BITRATE_CEILING_STANDARD_BPS
    }
}

/// Returns whether the probed file needs transcoding.
///
/// Rules, in order:
/// 1. No video stream (audio-only or non-media file) -> false.
/// 2. H.264 with effective bitrate at or below the width-dependent ceiling -> false.
/// 3. Everything else -> true.
///
/// An H.264 source with no reported bitrate counts as exceeding the ceiling;
/// a file we cannot size up gets re-encoded rather than served as-is.
pub fn needs_transcoding(probe: &ProbeResult) -> bool {
    let Some(video) = probe.primary_video() else {
        return false;
    };

    if !video.codec_name.eq_ignore_ascii_case("h264") {
        return true;
    }

    match probe.effective_bitrate_bps() {
        Some(rate) => rate > bitrate_ceiling_bps(video.width),
        None => true,
    }
}
