//! Error taxonomy for the transcription pipeline.

use std::path::PathBuf;

/// Fatal pipeline errors surfaced to the caller.
///
/// A missing audio stream is deliberately not represented here: it is a
/// non-fatal outcome (`media::audio::AudioOutcome::NoAudioStream`) consumed
/// inside the pipeline to trigger the visual fallback.
#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// ffmpeg exited non-zero for a reason other than a missing audio stream.
    #[error("audio conversion failed: {0}")]
    ConversionFailed(String),

    /// Speech-to-text exhausted every fallback strategy or returned an
    /// unusable result.
    #[error("ASR service error: {0}")]
    AsrService(String),

    /// Vision provider failure. Per-frame occurrences are caught and skipped
    /// by the captioning loop; only construction-time failures reach callers.
    #[error("vision service error: {0}")]
    VisionService(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TranscribeError>;
