//! FFmpeg execution for the streaming delivery profile.
//!
//! Every transcode produces the same output shape: H.264 high profile level
//! 4.0 at CRF 23, at most 1920 wide and 30 fps, yuv420p, AAC stereo at
//! 192 kbps / 48 kHz, in an MP4 with the moov atom up front. Progress is
//! streamed from ffmpeg's machine-readable progress output on stdout while
//! stderr is collected for diagnostics.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Fixed x264 quality settings for the delivery profile.
const VIDEO_CODEC: &str = "libx264";
const VIDEO_PROFILE: &str = "high";
const VIDEO_LEVEL: &str = "4.0";
const VIDEO_CRF: &str = "23";
const VIDEO_PRESET: &str = "fast";

/// Downscale-only width clamp; `-2` keeps the aspect ratio on an even height.
const SCALE_FILTER: &str = "scale=min(iw\\,1920):-2";

/// Frame rate ceiling in frames per second. Sources at or below it keep
/// their native rate.
pub const MAX_FPS: f64 = 30.0;
const FPS_FILTER: &str = "fps=30";

/// Suffix appended to the input stem to name the transcoded output.
pub const OUTPUT_SUFFIX: &str = "-transcoded";

/// Error type for transcode operations.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// ffmpeg exited with a non-zero status; carries its stderr output.
    #[error("ffmpeg failed with exit code {code}: {stderr}")]
    EncoderFailed { code: i32, stderr: String },

    /// ffmpeg was terminated by a signal.
    #[error("ffmpeg terminated by signal: {stderr}")]
    EncoderTerminated { stderr: String },

    /// The deadline elapsed and the encoder was killed.
    #[error("transcode exceeded deadline of {limit_secs}s and was killed")]
    TimedOut { limit_secs: u64 },

    /// IO error spawning or supervising ffmpeg.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters for one transcode execution.
#[derive(Debug, Clone)]
pub struct TranscodeParams {
    /// Path to the source file.
    pub input_path: PathBuf,
    /// Path for the normalized output file.
    pub output_path: PathBuf,
    /// Probed source duration; drives progress percentages.
    pub duration_secs: Option<f64>,
    /// Probed source frame rate; decides whether the fps cap applies.
    pub source_fps: Option<f64>,
}

/// A progress sample parsed from ffmpeg output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranscodeProgress {
    /// Seconds of output written so far.
    pub seconds_done: f64,
    /// Completion percentage (0..=100) when the source duration is known.
    pub percent: Option<f64>,
}

impl TranscodeProgress {
    fn at(seconds_done: f64, duration_secs: Option<f64>) -> Self {
        let percent = duration_secs
            .filter(|d| *d > 0.0)
            .map(|d| (seconds_done / d * 100.0).clamp(0.0, 100.0));

        Self {
            seconds_done,
            percent,
        }
    }
}

/// Derive the output path for a source file: same directory, same stem,
/// the transcoded suffix, and an mp4 extension.
pub fn output_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    input.with_file_name(format!("{}{}.mp4", stem, OUTPUT_SUFFIX))
}

/// Whether a file name looks like an output this module wrote.
///
/// Artifacts land next to their source inside the watched root, so
/// reconciliation asks this to keep them out of the media table.
pub fn is_artifact_name(name: &str) -> bool {
    name.to_ascii_lowercase()
        .strip_suffix(".mp4")
        .is_some_and(|stem| stem.ends_with(OUTPUT_SUFFIX))
}

/// Kill deadline for a transcode: the configured floor, or the scaled source
/// duration when that is longer.
pub fn transcode_deadline(duration_secs: Option<f64>, floor_secs: u64, factor: f64) -> Duration {
    let floor = Duration::from_secs(floor_secs);

    match duration_secs {
        Some(d) if d > 0.0 => {
            let scaled = d * factor;
            if scaled.is_finite() && scaled > 0.0 {
                floor.max(Duration::from_secs_f64(scaled))
            } else {
                floor
            }
        }
        _ => floor,
    }
}

/// Build the full ffmpeg argument list for the delivery profile.
///
/// The fps cap is only appended when the source rate is above the ceiling
/// or unknown; a 24 fps source keeps its native rate.
pub fn build_transcode_args(params: &TranscodeParams) -> Vec<String> {
    let mut args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        params.input_path.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "0:a:0?".to_string(),
    ];

    let mut filter = SCALE_FILTER.to_string();
    if params.source_fps.map_or(true, |fps| fps > MAX_FPS) {
        filter.push(',');
        filter.push_str(FPS_FILTER);
    }
    args.extend_from_slice(&["-vf".to_string(), filter]);

    args.extend_from_slice(&[
        "-c:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-profile:v".to_string(),
        VIDEO_PROFILE.to_string(),
        "-level:v".to_string(),
        VIDEO_LEVEL.to_string(),
        "-preset".to_string(),
        VIDEO_PRESET.to_string(),
        "-crf".to_string(),
        VIDEO_CRF.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-ar".to_string(),
        "48000".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
    ]);

    args.push(params.output_path.to_string_lossy().to_string());

    args
}

/// Parse one line of `-progress pipe:1` output into seconds of output
/// written. Both out_time_us and out_time_ms are microsecond counters.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let micros: i64 = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?
        .trim()
        .parse()
        .ok()?;

    (micros >= 0).then(|| micros as f64 / 1_000_000.0)
}

/// Execute a transcode, reporting progress as ffmpeg advances.
///
/// The child is killed once `deadline` elapses. On non-zero exit the
/// collected stderr text is returned inside the error so callers can persist
/// it for diagnosis.
///
/// # Errors
/// Returns an error if:
/// - ffmpeg cannot be spawned (IO error)
/// - ffmpeg exits non-zero or is terminated by a signal
/// - the deadline elapses before ffmpeg finishes
pub async fn run_transcode<F>(
    ffmpeg: &Path,
    params: &TranscodeParams,
    deadline: Duration,
    mut on_progress: F,
) -> Result<(), TranscodeError>
where
    F: FnMut(TranscodeProgress) + Send,
{
    let args = build_transcode_args(params);

    let mut child = Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Drain stderr concurrently so a chatty encoder cannot block on a full pipe
    let stderr_task = tokio::spawn(async move {
        let mut text = String::new();
        if let Some(stderr) = stderr {
            let mut reader = BufReader::new(stderr);
            let _ = reader.read_to_string(&mut text).await;
        }
        text
    });

    let waited = tokio::time::timeout(deadline, async {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(seconds_done) = parse_progress_line(&line) {
                    on_progress(TranscodeProgress::at(seconds_done, params.duration_secs));
                }
            }
        }
        child.wait().await
    })
    .await;

    let status = match waited {
        Ok(status) => status?,
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(TranscodeError::TimedOut {
                limit_secs: deadline.as_secs(),
            });
        }
    };

    let stderr_text = stderr_task.await.unwrap_or_default();

    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(TranscodeError::EncoderFailed {
                code,
                stderr: stderr_text.trim().to_string(),
            }),
            None => Err(TranscodeError::EncoderTerminated {
                stderr: stderr_text.trim().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Helper to check if args contain a flag with a specific value.
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn params_for(input: &str, fps: Option<f64>) -> TranscodeParams {
        let input_path = PathBuf::from(input);
        let output_path = output_path_for(&input_path);
        TranscodeParams {
            input_path,
            output_path,
            duration_secs: Some(60.0),
            source_fps: fps,
        }
    }

    // Strategy for generating valid path-like strings
    fn path_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("/[a-zA-Z0-9_/.-]{1,40}\\.(mov|mkv|avi|mp4)")
            .unwrap()
    }

    // For any input path and frame rate, the built argument list carries
    // the complete fixed delivery profile with the output path last.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_transcode_args_carry_the_full_profile(
            input in path_strategy(),
            fps in prop::option::of(1.0f64..240.0),
        ) {
            let params = params_for(&input, fps);
            let args = build_transcode_args(&params);

            prop_assert!(has_flag_with_value(&args, "-i", &input));
            prop_assert!(has_flag_with_value(&args, "-c:v", "libx264"));
            prop_assert!(has_flag_with_value(&args, "-profile:v", "high"));
            prop_assert!(has_flag_with_value(&args, "-level:v", "4.0"));
            prop_assert!(has_flag_with_value(&args, "-preset", "fast"));
            prop_assert!(has_flag_with_value(&args, "-crf", "23"));
            prop_assert!(has_flag_with_value(&args, "-pix_fmt", "yuv420p"));
            prop_assert!(has_flag_with_value(&args, "-c:a", "aac"));
            prop_assert!(has_flag_with_value(&args, "-b:a", "192k"));
            prop_assert!(has_flag_with_value(&args, "-ac", "2"));
            prop_assert!(has_flag_with_value(&args, "-ar", "48000"));
            prop_assert!(has_flag_with_value(&args, "-movflags", "+faststart"));
            prop_assert!(has_flag_with_value(&args, "-f", "mp4"));
            prop_assert!(has_flag_with_value(&args, "-progress", "pipe:1"));
            prop_assert!(has_flag_with_value(&args, "-map", "0:v:0"));
            prop_assert!(has_flag_with_value(&args, "-map", "0:a:0?"));

            // Output path is always the final argument
            let expected_output = params.output_path.to_string_lossy().to_string();
            prop_assert_eq!(args.last(), Some(&expected_output));
        }
    }

    #[test]
    fn test_scale_filter_always_present() {
        let args = build_transcode_args(&params_for("/media/a.mov", Some(25.0)));
        let vf = args
            .windows(2)
            .find(|pair| pair[0] == "-vf")
            .map(|pair| pair[1].clone())
            .unwrap();
        assert!(vf.contains("scale=min(iw\\,1920):-2"));
    }

    #[test]
    fn test_fps_cap_applies_only_above_ceiling() {
        let capped = build_transcode_args(&params_for("/media/a.mov", Some(59.94)));
        let vf = capped
            .windows(2)
            .find(|pair| pair[0] == "-vf")
            .map(|pair| pair[1].clone())
            .unwrap();
        assert!(vf.ends_with(",fps=30"));

        let native = build_transcode_args(&params_for("/media/a.mov", Some(23.976)));
        let vf = native
            .windows(2)
            .find(|pair| pair[0] == "-vf")
            .map(|pair| pair[1].clone())
            .unwrap();
        assert!(!vf.contains("fps=30"));

        // Exactly at the ceiling keeps the native rate
        let at_ceiling = build_transcode_args(&params_for("/media/a.mov", Some(30.0)));
        let vf = at_ceiling
            .windows(2)
            .find(|pair| pair[0] == "-vf")
            .map(|pair| pair[1].clone())
            .unwrap();
        assert!(!vf.contains("fps=30"));
    }

    #[test]
    fn test_unknown_fps_gets_capped() {
        let args = build_transcode_args(&params_for("/media/a.mov", None));
        let vf = args
            .windows(2)
            .find(|pair| pair[0] == "-vf")
            .map(|pair| pair[1].clone())
            .unwrap();
        assert!(vf.ends_with(",fps=30"));
    }

    #[test]
    fn test_is_artifact_name_matches_own_outputs() {
        assert!(is_artifact_name("shoot-transcoded.mp4"));
        assert!(is_artifact_name("Take.V2-TRANSCODED.MP4"));
        assert!(is_artifact_name(
            output_path_for(Path::new("/srv/media/clip.mov"))
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
        ));

        assert!(!is_artifact_name("shoot.mp4"));
        assert!(!is_artifact_name("shoot-transcoded.mov"));
        assert!(!is_artifact_name("transcoded.mp4"));
    }

    #[test]
    fn test_output_path_for_swaps_extension_and_adds_suffix() {
        assert_eq!(
            output_path_for(Path::new("/srv/media/project-7/shoot.mov")),
            PathBuf::from("/srv/media/project-7/shoot-transcoded.mp4")
        );
        // Stem keeps interior dots
        assert_eq!(
            output_path_for(Path::new("/srv/media/take.v2.mkv")),
            PathBuf::from("/srv/media/take.v2-transcoded.mp4")
        );
        // Relative paths work the same way
        assert_eq!(
            output_path_for(Path::new("clip.mp4")),
            PathBuf::from("clip-transcoded.mp4")
        );
    }

    #[test]
    fn test_parse_progress_line_microsecond_keys() {
        assert_eq!(parse_progress_line("out_time_us=1500000"), Some(1.5));
        assert_eq!(parse_progress_line("out_time_ms=2750000"), Some(2.75));
        assert_eq!(parse_progress_line("out_time_us=0"), Some(0.0));
    }

    #[test]
    fn test_parse_progress_line_ignores_other_keys() {
        assert_eq!(parse_progress_line("frame=120"), None);
        assert_eq!(parse_progress_line("speed=2.5x"), None);
        assert_eq!(parse_progress_line("progress=continue"), None);
        assert_eq!(parse_progress_line("out_time=00:00:01.500000"), None);
        assert_eq!(parse_progress_line("out_time_us=garbage"), None);
        // ffmpeg emits negative sentinel values before the first frame
        assert_eq!(parse_progress_line("out_time_us=-9223372036854775808"), None);
    }

    #[test]
    fn test_progress_percent_needs_duration() {
        let with_duration = TranscodeProgress::at(30.0, Some(120.0));
        assert_eq!(with_duration.percent, Some(25.0));

        let past_end = TranscodeProgress::at(150.0, Some(120.0));
        assert_eq!(past_end.percent, Some(100.0));

        let unknown = TranscodeProgress::at(30.0, None);
        assert!(unknown.percent.is_none());

        let degenerate = TranscodeProgress::at(30.0, Some(0.0));
        assert!(degenerate.percent.is_none());
    }

    #[test]
    fn test_transcode_deadline_floor_and_scaling() {
        // Short clip: the floor wins
        assert_eq!(
            transcode_deadline(Some(30.0), 600, 10.0),
            Duration::from_secs(600)
        );
        // Long clip: scaled duration wins
        assert_eq!(
            transcode_deadline(Some(3600.0), 600, 10.0),
            Duration::from_secs(36000)
        );
        // Unknown duration falls back to the floor
        assert_eq!(transcode_deadline(None, 600, 10.0), Duration::from_secs(600));
        // Degenerate values never panic
        assert_eq!(
            transcode_deadline(Some(-5.0), 600, 10.0),
            Duration::from_secs(600)
        );
        assert_eq!(
            transcode_deadline(Some(100.0), 600, f64::NAN),
            Duration::from_secs(600)
        );
    }
}
