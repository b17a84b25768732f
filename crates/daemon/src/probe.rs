//! Media file probing via ffprobe.
//!
//! Runs the configured ffprobe binary against a file and parses the JSON
//! output into typed stream and format metadata. Probing reads the file but
//! never modifies it; callers on the async runtime should wrap `probe_file`
//! in `spawn_blocking`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Probe failure modes.
///
/// A probe failure is always distinguishable from "no video stream": a file
/// that cannot be read or parsed yields an error, never an empty result.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    #[error("unparseable ffprobe output: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One video stream as reported by ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoStreamInfo {
    /// Codec name (e.g., "h264", "hevc", "prores").
    pub codec_name: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Stream-level bitrate in bits per second, when the container reports one.
    pub bitrate_bps: Option<u64>,
    /// Average frame rate in frames per second, when reported.
    pub fps: Option<f64>,
}

/// One audio stream as reported by ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioStreamInfo {
    /// Codec name (e.g., "aac", "pcm_s16le").
    pub codec_name: String,
    /// Number of audio channels.
    pub channels: u32,
}

/// Container-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatInfo {
    /// Duration in seconds, when reported.
    pub duration_secs: Option<f64>,
    /// File size in bytes as reported by the container.
    pub size_bytes: u64,
    /// Container-level bitrate in bits per second, when reported.
    pub bitrate_bps: Option<u64>,
}

/// Everything the pipeline needs to know about a probed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub video_streams: Vec<VideoStreamInfo>,
    pub audio_streams: Vec<AudioStreamInfo>,
    pub format: FormatInfo,
}

impl ProbeResult {
    /// Whether the file contains at least one video stream.
    pub fn has_video(&self) -> bool {
        !self.video_streams.is_empty()
    }

    /// The first video stream, which drives the transcode decision.
    pub fn primary_video(&self) -> Option<&VideoStreamInfo> {
        self.video_streams.first()
    }

    /// Whether the file contains at least one audio stream.
    pub fn has_audio(&self) -> bool {
        !self.audio_streams.is_empty()
    }

    /// The first audio stream.
    pub fn primary_audio(&self) -> Option<&AudioStreamInfo> {
        self.audio_streams.first()
    }

    /// Effective bitrate of the primary video stream in bits per second.
    ///
    /// Falls back to the container-level rate when the stream does not carry
    /// its own (common for MKV and MOV sources).
    pub fn effective_bitrate_bps(&self) -> Option<u64> {
        self.primary_video()
            .and_then(|v| v.bitrate_bps)
            .or(self.format.bitrate_bps)
    }

    /// Probed duration in seconds, when available.
    pub fn duration_secs(&self) -> Option<f64> {
        self.format.duration_secs
    }

    /// Frame rate of the primary video stream, when reported.
    pub fn video_fps(&self) -> Option<f64> {
        self.primary_video().and_then(|v| v.fps)
    }
}

/// Wire shape of the ffprobe JSON document. Numeric fields arrive as
/// strings, so everything is deserialized loosely and converted afterwards.
mod raw {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct Document {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub bit_rate: Option<String>,
        pub channels: Option<u32>,
        pub duration: Option<String>,
        pub avg_frame_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub size: Option<String>,
        pub bit_rate: Option<String>,
    }
}

fn parse_str_field<T: std::str::FromStr>(field: Option<&String>) -> Option<T> {
    field.and_then(|v| v.trim().parse().ok())
}

/// Probes a media file with the configured ffprobe binary.
///
/// Invokes ffprobe in quiet JSON mode with both streams and container
/// format requested, then decodes the result.
pub fn probe_file(ffprobe: &Path, path: &Path) -> Result<ProbeResult, ProbeError> {
    let output = Command::new(ffprobe)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    parse_probe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Decodes an ffprobe JSON document into a [`ProbeResult`].
///
/// A document without a `format` object is rejected so that an unreadable
/// file cannot masquerade as an empty one.
pub fn parse_probe_json(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let doc: raw::Document =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let format = doc
        .format
        .ok_or_else(|| ProbeError::ParseError("no format object in ffprobe output".to_string()))?;

    let mut video_streams = Vec::new();
    let mut audio_streams = Vec::new();
    let mut stream_duration: Option<f64> = None;

    for stream in doc.streams.unwrap_or_default() {
        if let Some(secs) = parse_str_field::<f64>(stream.duration.as_ref()) {
            stream_duration = Some(stream_duration.map_or(secs, |cur: f64| cur.max(secs)));
        }

        match stream.codec_type.as_deref() {
            Some("video") => video_streams.push(VideoStreamInfo {
                codec_name: stream.codec_name.unwrap_or_default(),
                width: stream.width.unwrap_or(0),
                height: stream.height.unwrap_or(0),
                bitrate_bps: parse_str_field(stream.bit_rate.as_ref()),
                fps: stream.avg_frame_rate.as_deref().and_then(parse_frame_rate),
            }),
            Some("audio") => audio_streams.push(AudioStreamInfo {
                codec_name: stream.codec_name.unwrap_or_default(),
                channels: stream.channels.unwrap_or(0),
            }),
            _ => {}
        }
    }

    // Containers like MXF omit the format-level duration; the longest
    // stream duration stands in for it.
    let duration_secs = parse_str_field::<f64>(format.duration.as_ref()).or(stream_duration);

    Ok(ProbeResult {
        video_streams,
        audio_streams,
        format: FormatInfo {
            duration_secs,
            size_bytes: parse_str_field(format.size.as_ref()).unwrap_or(0),
            bitrate_bps: parse_str_field(format.bit_rate.as_ref()),
        },
    })
}

/// Parses an ffprobe frame rate, either rational ("30000/1001") or plain.
///
/// Degenerate values such as "0/0" yield None.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let value = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };

    (value.is_finite() && value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let json = r#"{
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "hevc",
                    "width": 1920,
                    "height": 1080,
                    "bit_rate": "50000000",
                    "avg_frame_rate": "30000/1001"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "channels": 2
                }
            ],
            "format": {
                "duration": "83.5",
                "size": "524288000",
                "bit_rate": "50238000"
            }
        }"#;

        let result = parse_probe_json(json).expect("full document parses");

        assert_eq!(result.video_streams.len(), 1);
        assert_eq!(result.video_streams[0].codec_name, "hevc");
        assert_eq!(result.video_streams[0].width, 1920);
        assert_eq!(result.video_streams[0].height, 1080);
        assert_eq!(result.video_streams[0].bitrate_bps, Some(50_000_000));
        assert!((result.video_streams[0].fps.unwrap() - 29.97).abs() < 0.01);

        assert_eq!(result.audio_streams.len(), 1);
        assert_eq!(result.audio_streams[0].codec_name, "aac");
        assert_eq!(result.audio_streams[0].channels, 2);

        assert!((result.format.duration_secs.unwrap() - 83.5).abs() < 0.001);
        assert_eq!(result.format.size_bytes, 524288000);
        assert_eq!(result.format.bitrate_bps, Some(50_238_000));
    }

    #[test]
    fn test_parse_document_without_streams() {
        let json = r#"{
            "streams": [],
            "format": {
                "duration": "100.0",
                "size": "1000000"
            }
        }"#;

        let result = parse_probe_json(json).expect("empty stream list parses");
        assert!(result.video_streams.is_empty());
        assert!(result.audio_streams.is_empty());
        assert!(!result.has_video());
        assert!(!result.has_audio());
    }

    #[test]
    fn test_parse_document_sparse_video_stream() {
        let json = r#"{
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264"
                }
            ],
            "format": {
                "size": "500000"
            }
        }"#;

        let result =
            parse_probe_json(json).expect("sparse stream parses");
        assert_eq!(result.video_streams.len(), 1);
        assert_eq!(result.video_streams[0].width, 0);
        assert_eq!(result.video_streams[0].height, 0);
        assert!(result.video_streams[0].bitrate_bps.is_none());
        assert!(result.video_streams[0].fps.is_none());
        assert!(result.duration_secs().is_none());
    }

    #[test]
    fn test_missing_format_object_is_rejected() {
        let json = r#"{
            "streams": []
        }"#;

        let err = parse_probe_json(json).expect_err("Missing format must not parse");
        assert!(matches!(err, ProbeError::ParseError(_)));
    }

    #[test]
    fn test_duration_falls_back_to_stream_duration() {
        let json = r#"{
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1280,
                    "height": 720,
                    "duration": "42.25"
                }
            ],
            "format": {
                "size": "9000000"
            }
        }"#;

        let result = parse_probe_json(json).expect("Should parse");
        assert!((result.duration_secs().unwrap() - 42.25).abs() < 0.001);
    }

    #[test]
    fn test_effective_bitrate_prefers_stream_rate() {
        let result = ProbeResult {
            video_streams: vec![VideoStreamInfo {
                codec_name: "h264".to_string(),
                width: 1920,
                height: 1080,
                bitrate_bps: Some(8_000_000),
                fps: Some(24.0),
            }],
            audio_streams: vec![],
            format: FormatInfo {
                duration_secs: Some(60.0),
                size_bytes: 60_000_000,
                bitrate_bps: Some(8_500_000),
            },
        };

        assert_eq!(result.effective_bitrate_bps(), Some(8_000_000));
    }

    #[test]
    fn test_effective_bitrate_falls_back_to_format_rate() {
        let result = ProbeResult {
            video_streams: vec![VideoStreamInfo {
                codec_name: "h264".to_string(),
                width: 1920,
                height: 1080,
                bitrate_bps: None,
                fps: Some(24.0),
            }],
            audio_streams: vec![],
            format: FormatInfo {
                duration_secs: Some(60.0),
                size_bytes: 60_000_000,
                bitrate_bps: Some(8_500_000),
            },
        };

        assert_eq!(result.effective_bitrate_bps(), Some(8_500_000));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_probe_json("not json at all").expect_err("Garbage must not parse");
        assert!(matches!(err, ProbeError::ParseError(_)));
    }

    #[test]
    fn test_parse_frame_rate_forms() {
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("23.976"), Some(23.976));
        // ffprobe reports 0/0 for streams with no timing info
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }
}
