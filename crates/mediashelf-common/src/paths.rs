//! Path utilities for media files and conversion outputs.

use std::path::{Path, PathBuf};

/// List of supported video file extensions.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "ts", "webm", "mov", "wmv", "flv",
];

/// Extension every conversion output gets.
pub const CONVERTED_EXTENSION: &str = "mp4";

/// Check if a path has a video file extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use mediashelf_common::paths::is_video_file;
///
/// assert!(is_video_file(Path::new("movie.mkv")));
/// assert!(is_video_file(Path::new("/path/to/video.MP4")));
/// assert!(!is_video_file(Path::new("subtitle.srt")));
/// ```
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Derive the conversion destination for a source file.
///
/// The source's extension is replaced with `.mp4`; a file without an
/// extension gets one appended. The result depends only on the source path.
///
/// ```
/// use std::path::{Path, PathBuf};
/// use mediashelf_common::paths::destination_path_for;
///
/// assert_eq!(
///     destination_path_for(Path::new("/media/show/ep01.mkv")),
///     PathBuf::from("/media/show/ep01.mp4")
/// );
/// assert_eq!(
///     destination_path_for(Path::new("/media/raw")),
///     PathBuf::from("/media/raw.mp4")
/// );
/// ```
pub fn destination_path_for(source: &Path) -> PathBuf {
    source.with_extension(CONVERTED_EXTENSION)
}

/// Check whether `path` is `dir` itself or lies beneath it.
///
/// Comparison is component-wise, so `/media/movies2` is not inside
/// `/media/movies`.
pub fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("movie.mkv")));
        assert!(is_video_file(Path::new("movie.AVI")));
        assert!(!is_video_file(Path::new("cover.jpg")));
        assert!(!is_video_file(Path::new("no_extension")));
    }

    #[test]
    fn test_destination_replaces_extension() {
        assert_eq!(
            destination_path_for(Path::new("/a/b/clip.webm")),
            PathBuf::from("/a/b/clip.mp4")
        );
        // Only the last extension is replaced.
        assert_eq!(
            destination_path_for(Path::new("/a/show.s01e01.mkv")),
            PathBuf::from("/a/show.s01e01.mp4")
        );
    }

    #[test]
    fn test_destination_is_deterministic() {
        let source = Path::new("/media/movie.mov");
        assert_eq!(destination_path_for(source), destination_path_for(source));
    }

    #[test]
    fn test_is_within() {
        let dir = Path::new("/media/movies");
        assert!(is_within(Path::new("/media/movies/a.mkv"), dir));
        assert!(is_within(Path::new("/media/movies"), dir));
        assert!(!is_within(Path::new("/media/movies2/a.mkv"), dir));
        assert!(!is_within(Path::new("/media/a.mkv"), dir));
    }
}
