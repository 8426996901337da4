//! Input normalization: a path or an in-memory buffer becomes one handle.

use crate::error::{Result, TranscribeError};
use log::{debug, error, info};
use std::path::{Path, PathBuf};

/// Filename extensions treated as video for the fallback decision and the
/// declared media type.
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".avi", ".mkv", ".webm"];

/// Raw pipeline input.
#[derive(Debug, Clone)]
pub enum MediaSource {
    Path(PathBuf),
    Bytes { data: Vec<u8>, filename: String },
}

impl From<PathBuf> for MediaSource {
    fn from(path: PathBuf) -> Self {
        MediaSource::Path(path)
    }
}

impl From<&Path> for MediaSource {
    fn from(path: &Path) -> Self {
        MediaSource::Path(path.to_path_buf())
    }
}

/// Validated input plus its resolved display filename. Created once per
/// pipeline invocation and read by every stage.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub source: MediaSource,
    pub filename: String,
}

/// Validate the input shape. No side effects.
pub fn resolve_input(source: MediaSource) -> Result<ResolvedInput> {
    match source {
        MediaSource::Path(path) => {
            debug!("resolving input path: {}", path.display());
            if !path.exists() {
                error!("input file not found: {}", path.display());
                return Err(TranscribeError::NotFound(path));
            }
            if !path.is_file() {
                return Err(TranscribeError::UnsupportedInput(format!(
                    "not a regular file: {}",
                    path.display()
                )));
            }
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    TranscribeError::UnsupportedInput(format!(
                        "path has no filename: {}",
                        path.display()
                    ))
                })?;
            info!("input resolved: {}", filename);
            Ok(ResolvedInput {
                source: MediaSource::Path(path),
                filename,
            })
        }
        MediaSource::Bytes { data, filename } => {
            debug!("resolving in-memory input, {} bytes", data.len());
            if filename.trim().is_empty() {
                return Err(TranscribeError::InvalidInput(
                    "filename is required for in-memory input".to_string(),
                ));
            }
            if data.is_empty() {
                return Err(TranscribeError::InvalidInput(
                    "empty byte buffer provided".to_string(),
                ));
            }
            info!("input resolved: {} (in-memory)", filename);
            Ok(ResolvedInput {
                source: MediaSource::Bytes {
                    data,
                    filename: filename.clone(),
                },
                filename,
            })
        }
    }
}

/// Whether the filename's extension declares a video container.
pub fn is_video_filename(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_path_is_not_found() {
        let err = resolve_input(MediaSource::Path(PathBuf::from("/definitely/not/here.wav")))
            .unwrap_err();
        assert!(matches!(err, TranscribeError::NotFound(_)));
    }

    #[test]
    fn directory_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input(MediaSource::Path(dir.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, TranscribeError::UnsupportedInput(_)));
    }

    #[test]
    fn existing_file_resolves_to_its_name() {
        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(b"RIFF").unwrap();
        let resolved = resolve_input(MediaSource::Path(file.path().to_path_buf())).unwrap();
        assert!(resolved.filename.ends_with(".wav"));
    }

    #[test]
    fn bytes_require_filename_and_content() {
        let err = resolve_input(MediaSource::Bytes {
            data: vec![1, 2, 3],
            filename: "  ".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, TranscribeError::InvalidInput(_)));

        let err = resolve_input(MediaSource::Bytes {
            data: Vec::new(),
            filename: "clip.mp4".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, TranscribeError::InvalidInput(_)));

        let ok = resolve_input(MediaSource::Bytes {
            data: vec![0u8; 16],
            filename: "clip.mp4".to_string(),
        })
        .unwrap();
        assert_eq!(ok.filename, "clip.mp4");
    }

    #[test]
    fn video_extension_detection_is_case_insensitive() {
        assert!(is_video_filename("Movie.MP4"));
        assert!(is_video_filename("clip.webm"));
        assert!(!is_video_filename("speech.wav"));
        assert!(!is_video_filename("notes.txt"));
    }
}
