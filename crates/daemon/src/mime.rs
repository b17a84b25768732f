//! File extension to MIME type classification.
//!
//! The table is total: every path maps to some MIME type, with
//! `application/octet-stream` covering anything unrecognized. Video
//! classification (which gates the transcoding pipeline) derives from the
//! MIME type, never from ad-hoc extension checks elsewhere.

use std::path::Path;

/// MIME type assigned to files with no recognized extension.
pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Known extension to MIME type pairs (case-insensitive matching).
const MIME_TABLE: &[(&str, &str)] = &[
    // video
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
    ("mpg", "video/mpeg"),
    ("mpeg", "video/mpeg"),
    ("ts", "video/mp2t"),
    ("m2ts", "video/mp2t"),
    ("wmv", "video/x-ms-wmv"),
    ("flv", "video/x-flv"),
    ("3gp", "video/3gpp"),
    // audio
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("aac", "audio/aac"),
    ("flac", "audio/flac"),
    ("ogg", "audio/ogg"),
    ("m4a", "audio/mp4"),
    ("aif", "audio/aiff"),
    ("aiff", "audio/aiff"),
    // stills and paperwork that land in delivery folders
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    ("srt", "application/x-subrip"),
    ("zip", "application/zip"),
];

/// Looks up the MIME type for a bare extension (without the dot).
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let ext_lower = ext.to_lowercase();
    MIME_TABLE
        .iter()
        .find(|(e, _)| *e == ext_lower)
        .map(|(_, mime)| *mime)
}

/// Classifies a path into a MIME type.
///
/// Total function: unknown or missing extensions yield [`FALLBACK_MIME`].
pub fn mime_for_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_for_extension)
        .unwrap_or(FALLBACK_MIME)
}

/// Whether a MIME type denotes video content.
pub fn is_video_mime(mime: &str) -> bool {
    mime.starts_with("video/")
}

/// Whether a path classifies as a video file.
pub fn is_video_file(path: &Path) -> bool {
    is_video_mime(mime_for_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    #[test]
    fn test_common_video_types() {
        assert_eq!(mime_for_path(Path::new("/media/clip.mp4")), "video/mp4");
        assert_eq!(mime_for_path(Path::new("/media/clip.mov")), "video/quicktime");
        assert_eq!(mime_for_path(Path::new("/media/clip.mkv")), "video/x-matroska");
        assert_eq!(mime_for_path(Path::new("/media/clip.avi")), "video/x-msvideo");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert_eq!(mime_for_path(Path::new("/media/CLIP.MOV")), "video/quicktime");
        assert_eq!(mime_for_path(Path::new("/media/clip.Mp4")), "video/mp4");
    }

    #[test]
    fn test_unknown_extension_falls_back() {
        assert_eq!(mime_for_path(Path::new("/media/readme.xyz")), FALLBACK_MIME);
        assert_eq!(mime_for_path(Path::new("/media/noextension")), FALLBACK_MIME);
        assert_eq!(mime_for_path(Path::new("/media/.hidden")), FALLBACK_MIME);
    }

    #[test]
    fn test_non_video_types() {
        assert_eq!(mime_for_path(Path::new("/media/notes.txt")), "text/plain");
        assert_eq!(mime_for_path(Path::new("/media/score.pdf")), "application/pdf");
        assert_eq!(mime_for_path(Path::new("/media/mix.wav")), "audio/wav");
    }

    #[test]
    fn test_is_video_mime() {
        assert!(is_video_mime("video/mp4"));
        assert!(is_video_mime("video/quicktime"));
        assert!(!is_video_mime("audio/wav"));
        assert!(!is_video_mime(FALLBACK_MIME));
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/media/clip.mov")));
        assert!(is_video_file(Path::new("/media/clip.webm")));
        assert!(!is_video_file(Path::new("/media/mix.mp3")));
        assert!(!is_video_file(Path::new("/media/still.png")));
    }

    // For any path, classification is total: some non-empty MIME type comes
    // back, and video classification agrees with the "video/" prefix.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_classification_is_total(
            basename in "[a-zA-Z0-9_ .-]{1,24}",
            ext in "[a-zA-Z0-9]{0,6}",
        ) {
            let path = if ext.is_empty() {
                PathBuf::from(format!("/media/{}", basename))
            } else {
                PathBuf::from(format!("/media/{}.{}", basename, ext))
            };

            let mime = mime_for_path(&path);
            prop_assert!(!mime.is_empty());
            prop_assert!(mime.contains('/'));
            prop_assert_eq!(is_video_file(&path), mime.starts_with("video/"));
        }

        #[test]
        fn prop_video_extension_classification(
            basename in "[a-zA-Z0-9_-]{1,20}",
            ext in prop_oneof![
                // Video extensions (should classify as video)
                Just("mp4"), Just("MP4"), Just("Mov"), Just("mkv"),
                Just("avi"), Just("webm"), Just("m2ts"), Just("wmv"),
                // Non-video extensions (should not)
                Just("txt"), Just("jpg"), Just("pdf"), Just("wav"),
                Just("mp3"), Just("zip"), Just("srt"), Just("png"),
            ],
        ) {
            let path = PathBuf::from(format!("/media/{}.{}", basename, ext));

            let expected_video = matches!(
                ext.to_lowercase().as_str(),
                "mp4" | "mov" | "mkv" | "avi" | "webm" | "m2ts" | "wmv"
            );

            prop_assert_eq!(
                is_video_file(&path), expected_video,
                "Extension '{}' video classification mismatch", ext
            );
        }
    }
}
