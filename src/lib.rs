//! av-scribe: turn an audio or video file into a time-ordered transcript
//! document.
//!
//! Speech is transcribed through a hosted ASR service; for videos that yield
//! no speech at all, representative keyframes are captioned by a vision model
//! instead, so the document is never silently empty when the provider can say
//! something about the picture.

pub mod config;
pub mod conversation;
pub mod document;
pub mod error;
pub mod input;
pub mod media;
pub mod pipeline;
pub mod providers;

pub use conversation::{ConversationItem, ConversationWord, ItemOrigin};
pub use document::{DocumentOrigin, TranscriptDocument};
pub use error::{Result, TranscribeError};
pub use input::MediaSource;
pub use pipeline::{Pipeline, TranscribeOptions, TranscriptionResult};

use std::path::{Path, PathBuf};

/// Set up logging to stdout and `./logs/av-scribe.log`. Call once, early;
/// a second call returns an error from the global logger.
pub fn init_logger() -> std::result::Result<PathBuf, fern::InitError> {
    let log_dir = PathBuf::from(".").join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = log_dir.join("av-scribe.log");

    let format = |out: fern::FormatCallback<'_>,
                  message: &std::fmt::Arguments<'_>,
                  record: &log::Record| {
        out.finish(format_args!(
            "[{}][{}][{}][{:?}] {}",
            chrono::Local::now().format("%Y-%m-%d"),
            chrono::Local::now().format("%H:%M:%S"),
            record.target(),
            record.level(),
            message
        ))
    };

    fern::Dispatch::new()
        .format(format)
        .level(log::LevelFilter::Debug)
        .chain(
            fern::Dispatch::new()
                .filter(|m| !m.target().starts_with("hyper") && !m.target().starts_with("reqwest"))
                .chain(std::io::stdout()),
        )
        .chain(fern::log_file(&log_file)?)
        .apply()?;

    Ok(log_file)
}

/// Transcribe a file on disk with providers built from the environment.
pub async fn transcribe_file(
    path: impl AsRef<Path>,
    options: &TranscribeOptions,
) -> Result<TranscriptDocument> {
    let pipeline = Pipeline::from_env()?;
    pipeline
        .transcribe(MediaSource::Path(path.as_ref().to_path_buf()), options)
        .await
}

/// Transcribe an in-memory buffer with providers built from the environment.
/// The filename carries the container format (its extension decides whether
/// the input counts as a video).
pub async fn transcribe_bytes(
    data: Vec<u8>,
    filename: impl Into<String>,
    options: &TranscribeOptions,
) -> Result<TranscriptDocument> {
    let pipeline = Pipeline::from_env()?;
    pipeline
        .transcribe(
            MediaSource::Bytes {
                data,
                filename: filename.into(),
            },
            options,
        )
        .await
}

/// Like [`transcribe_file`], but keeps the extracted WAV for the caller.
pub async fn transcribe_file_with_artifacts(
    path: impl AsRef<Path>,
    options: &TranscribeOptions,
) -> Result<TranscriptionResult> {
    let pipeline = Pipeline::from_env()?;
    pipeline
        .transcribe_with_artifacts(MediaSource::Path(path.as_ref().to_path_buf()), options)
        .await
}

/// Like [`transcribe_bytes`], but keeps the extracted WAV for the caller.
pub async fn transcribe_bytes_with_artifacts(
    data: Vec<u8>,
    filename: impl Into<String>,
    options: &TranscribeOptions,
) -> Result<TranscriptionResult> {
    let pipeline = Pipeline::from_env()?;
    pipeline
        .transcribe_with_artifacts(
            MediaSource::Bytes {
                data,
                filename: filename.into(),
            },
            options,
        )
        .await
}
