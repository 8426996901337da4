//! Canonical WAV extraction via ffmpeg.

use crate::error::{Result, TranscribeError};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

/// stderr fragments that identify a "no audio track" failure rather than a
/// broken conversion. Compared case-insensitively.
const NO_AUDIO_ERROR_MARKERS: &[&str] = &[
    "output file does not contain any stream",
    "stream specifier ':a'",
    "matches no streams",
];

/// Outcome of audio normalization. A missing audio stream is a signal for
/// the caller, not an error.
#[derive(Debug)]
pub enum AudioOutcome {
    /// Path to mono 16 kHz WAV. Either the untouched input (already WAV)
    /// or a fresh temporary file the caller now owns.
    Wav(PathBuf),
    NoAudioStream,
}

/// Seam for the external conversion step, so tests can substitute a double.
pub trait AudioExtractor: Send + Sync {
    fn ensure_wav(&self, source: &Path) -> Result<AudioOutcome>;
}

/// Default extractor shelling out to `ffmpeg`.
pub struct FfmpegAudioExtractor;

impl AudioExtractor for FfmpegAudioExtractor {
    fn ensure_wav(&self, source: &Path) -> Result<AudioOutcome> {
        ensure_wav_audio(source)
    }
}

/// Ensure `source` is available as mono 16 kHz WAV, converting when needed.
/// A WAV extension bypasses conversion entirely; otherwise ffmpeg writes a
/// fresh temporary file whose cleanup belongs to the caller on success.
pub fn ensure_wav_audio(source: &Path) -> Result<AudioOutcome> {
    info!("ensuring WAV audio for {}", source.display());

    let is_wav = source
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("wav"));
    if is_wav {
        debug!("input is already WAV, no conversion needed");
        return Ok(AudioOutcome::Wav(source.to_path_buf()));
    }

    let tmp = tempfile::Builder::new()
        .prefix("av_scribe_audio_")
        .suffix(".wav")
        .tempfile()?
        .into_temp_path();
    debug!("converting to WAV via ffmpeg, target {}", tmp.display());

    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(source)
        .args(["-ac", "1", "-ar", "16000"])
        .arg(&tmp)
        .arg("-y")
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("ffmpeg exit status: {}", output.status);
        // tmp is dropped here, deleting the partial output.
        if is_no_audio_stream(&stderr) {
            info!("no audio stream found in {}", source.display());
            return Ok(AudioOutcome::NoAudioStream);
        }
        warn!("ffmpeg conversion failed: {}", stderr.trim());
        return Err(TranscribeError::ConversionFailed(
            stderr.trim().to_string(),
        ));
    }

    let wav_path = tmp
        .keep()
        .map_err(|e| TranscribeError::ConversionFailed(format!("cannot keep wav artifact: {}", e)))?;
    info!("converted to WAV: {}", wav_path.display());
    Ok(AudioOutcome::Wav(wav_path))
}

/// Whether ffmpeg's diagnostics indicate a missing audio stream.
pub(crate) fn is_no_audio_stream(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    NO_AUDIO_ERROR_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_audio_markers_match_case_insensitively() {
        assert!(is_no_audio_stream(
            "Output file does not contain any stream"
        ));
        assert!(is_no_audio_stream(
            "Stream map '0:a' matches no streams.\nTo ignore this, add a trailing '?'"
        ));
        assert!(is_no_audio_stream("Invalid Stream specifier ':a' in filtergraph"));
    }

    #[test]
    fn other_failures_are_not_classified_as_no_audio() {
        assert!(!is_no_audio_stream("moov atom not found"));
        assert!(!is_no_audio_stream("Permission denied"));
        assert!(!is_no_audio_stream(""));
    }

    #[test]
    fn wav_extension_bypasses_conversion() {
        let file = tempfile::Builder::new().suffix(".WAV").tempfile().unwrap();
        match ensure_wav_audio(file.path()).unwrap() {
            AudioOutcome::Wav(path) => assert_eq!(path, file.path()),
            AudioOutcome::NoAudioStream => panic!("wav input misclassified"),
        }
    }
}
