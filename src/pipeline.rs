//! Pipeline orchestration: input → WAV → ASR → visual fallback → document.

use crate::conversation::ConversationItem;
use crate::document::{build_document, TranscriptDocument};
use crate::error::Result;
use crate::input::{is_video_filename, resolve_input, MediaSource, ResolvedInput};
use crate::media::{
    AudioExtractor, AudioOutcome, FfmpegAudioExtractor, KeyframeSource, SceneKeyframeExtractor,
};
use crate::providers::{DashScopeAsrClient, DashScopeVisionClient, KeyframeCaptioner, SpeechToText};
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Per-call options.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    /// Language hint forwarded to the speech-to-text provider.
    pub language: String,
    /// Optional summary line placed at the top of the document.
    pub summary: Option<String>,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language: "zh".to_string(),
            summary: None,
        }
    }
}

/// Document plus the extracted WAV artifact, whose lifecycle belongs to the
/// caller. `audio_path` is `None` when the input had no audio stream.
#[derive(Debug)]
pub struct TranscriptionResult {
    pub document: TranscriptDocument,
    pub audio_path: Option<PathBuf>,
}

/// Explicit pipeline context. Providers and extractors are injected, so a
/// caller (or a test) can swap any collaborator; no module-level state.
pub struct Pipeline {
    asr: Box<dyn SpeechToText>,
    vision: Option<Box<dyn KeyframeCaptioner>>,
    audio: Box<dyn AudioExtractor>,
    keyframes: Box<dyn KeyframeSource>,
}

impl Pipeline {
    pub fn new(asr: Box<dyn SpeechToText>, vision: Option<Box<dyn KeyframeCaptioner>>) -> Self {
        Self {
            asr,
            vision,
            audio: Box::new(FfmpegAudioExtractor),
            keyframes: Box::new(SceneKeyframeExtractor::default()),
        }
    }

    /// Build a pipeline from environment settings. A vision configuration
    /// failure silently disables the visual fallback rather than failing.
    pub fn from_env() -> Result<Self> {
        let asr = DashScopeAsrClient::from_env()?;
        let vision: Option<Box<dyn KeyframeCaptioner>> = match DashScopeVisionClient::from_env() {
            Ok(client) => Some(Box::new(client)),
            Err(e) => {
                info!("vision provider disabled: {}", e);
                None
            }
        };
        Ok(Self::new(Box::new(asr), vision))
    }

    pub fn with_audio_extractor(mut self, audio: Box<dyn AudioExtractor>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_keyframe_source(mut self, keyframes: Box<dyn KeyframeSource>) -> Self {
        self.keyframes = keyframes;
        self
    }

    /// Transcribe and return only the document. A WAV file extracted along
    /// the way is deleted before returning.
    pub async fn transcribe(
        &self,
        source: MediaSource,
        options: &TranscribeOptions,
    ) -> Result<TranscriptDocument> {
        let (document, wav_path, wav_is_temp) = self.run(source, options).await?;
        if wav_is_temp {
            if let Some(wav) = wav_path {
                debug!("removing intermediate wav artifact: {}", wav.display());
                let _ = std::fs::remove_file(&wav);
            }
        }
        Ok(document)
    }

    /// Transcribe and hand the extracted WAV artifact to the caller.
    pub async fn transcribe_with_artifacts(
        &self,
        source: MediaSource,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult> {
        let (document, audio_path, _) = self.run(source, options).await?;
        Ok(TranscriptionResult {
            document,
            audio_path,
        })
    }

    async fn run(
        &self,
        source: MediaSource,
        options: &TranscribeOptions,
    ) -> Result<(TranscriptDocument, Option<PathBuf>, bool)> {
        let input = resolve_input(source)?;
        info!("starting transcription pipeline for {}", input.filename);

        let binary_hash = compute_binary_hash(&input);
        let (wav_path, wav_is_temp) = self.prepare_wav_artifact(&input)?;

        let mut conversation: Vec<ConversationItem> = match &wav_path {
            None => {
                info!(
                    "no audio stream detected for {}; skipping speech-to-text stage",
                    input.filename
                );
                Vec::new()
            }
            Some(wav) => {
                let transcribed = match &input.source {
                    MediaSource::Path(_) => {
                        self.asr.transcribe_path(wav, &options.language).await
                    }
                    MediaSource::Bytes { .. } => match std::fs::read(wav) {
                        Ok(wav_bytes) => {
                            debug!("wav data size after conversion: {} bytes", wav_bytes.len());
                            self.asr
                                .transcribe_bytes(wav_bytes, &input.filename, &options.language)
                                .await
                        }
                        Err(e) => Err(e.into()),
                    },
                };
                match transcribed {
                    Ok(items) => items,
                    Err(e) => {
                        // A failing later stage must not leak the extracted WAV.
                        if wav_is_temp {
                            let _ = std::fs::remove_file(wav);
                        }
                        return Err(e);
                    }
                }
            }
        };
        info!("transcription completed with {} item(s)", conversation.len());

        let is_video = is_video_filename(&input.filename);
        if is_video && conversation.is_empty() && self.vision.is_some() {
            info!("audio transcription is empty for video input; attempting keyframe analysis");
            let visual = self.describe_video_frames(&input).await;
            if !visual.is_empty() {
                info!("added {} visual item(s) generated from keyframes", visual.len());
                conversation.extend(visual);
            }
        }

        let mimetype = if is_video { "video/mp4" } else { "audio/wav" };
        let document = build_document(
            &input.filename,
            mimetype,
            binary_hash,
            conversation,
            options.summary.as_deref(),
        );
        Ok((document, wav_path, wav_is_temp))
    }

    /// Normalize the input into a WAV file. Returns the path (when an audio
    /// stream exists) and whether it is a temporary the pipeline created.
    fn prepare_wav_artifact(&self, input: &ResolvedInput) -> Result<(Option<PathBuf>, bool)> {
        let (source_path, temp_source): (PathBuf, Option<TempPath>) = match &input.source {
            MediaSource::Path(path) => (path.clone(), None),
            MediaSource::Bytes { data, filename } => {
                let temp = write_temp_source(data, filename)?;
                (temp.to_path_buf(), Some(temp))
            }
        };

        match self.audio.ensure_wav(&source_path)? {
            AudioOutcome::NoAudioStream => Ok((None, false)),
            AudioOutcome::Wav(wav) => {
                if let Some(temp) = temp_source {
                    if wav.as_path() == &*temp {
                        // Bypass on the spilled buffer: the spill itself is
                        // the artifact, so it survives this scope.
                        let kept = temp.keep().map_err(|e| e.error)?;
                        return Ok((Some(kept), true));
                    }
                    // Intermediate spill is deleted when `temp` drops here.
                    debug!("cleaning up intermediate temp file: {}", temp.display());
                }
                let is_temp = match &input.source {
                    MediaSource::Path(path) => wav.as_path() != path.as_path(),
                    MediaSource::Bytes { .. } => true,
                };
                Ok((Some(wav), is_temp))
            }
        }
    }

    /// Keyframe extraction plus captioning. Any failure here only disables
    /// the visual items; it never fails the pipeline.
    async fn describe_video_frames(&self, input: &ResolvedInput) -> Vec<ConversationItem> {
        let Some(vision) = &self.vision else {
            return Vec::new();
        };

        let (video_path, _temp_guard): (PathBuf, Option<TempPath>) = match &input.source {
            MediaSource::Path(path) => (path.clone(), None),
            MediaSource::Bytes { data, filename } => match write_temp_source(data, filename) {
                Ok(temp) => (temp.to_path_buf(), Some(temp)),
                Err(e) => {
                    error!("failed to spill video bytes for keyframe analysis: {}", e);
                    return Vec::new();
                }
            },
        };

        let frames = match self.keyframes.extract(&video_path) {
            Ok(set) => set,
            Err(e) => {
                error!("keyframe extraction failed for {}: {}", input.filename, e);
                return Vec::new();
            }
        };
        if frames.is_empty() {
            info!("no keyframes extracted for video input: {}", input.filename);
            return Vec::new();
        }

        info!("describing {} keyframe(s) via vision provider", frames.len());
        match vision.describe_frames(frames.frames()).await {
            Ok(items) => items,
            Err(e) => {
                error!("keyframe captioning failed for {}: {}", input.filename, e);
                Vec::new()
            }
        }
    }
}

/// sha256 over the exact input bytes; falls back to hashing the filename so
/// assembly never fails outright on an unreadable input.
fn compute_binary_hash(input: &ResolvedInput) -> String {
    let mut hasher = Sha256::new();
    match &input.source {
        MediaSource::Bytes { data, .. } => hasher.update(data),
        MediaSource::Path(path) => {
            if let Err(e) = hash_file(&mut hasher, path) {
                warn!(
                    "failed to compute binary hash for {}: {}",
                    input.filename, e
                );
                let mut fallback = Sha256::new();
                fallback.update(input.filename.as_bytes());
                return hex_digest(&fallback.finalize());
            }
        }
    }
    hex_digest(&hasher.finalize())
}

fn hash_file(hasher: &mut Sha256, path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Spill an in-memory buffer to a suffix-preserving temp file so external
/// tools can see the container format.
fn write_temp_source(data: &[u8], filename: &str) -> std::io::Result<TempPath> {
    let suffix = Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".bin".to_string());
    let mut temp = tempfile::Builder::new()
        .prefix("av_scribe_input_")
        .suffix(&suffix)
        .tempfile()?;
    temp.write_all(data)?;
    debug!("wrote temporary file for in-memory input: {}", temp.path().display());
    Ok(temp.into_temp_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_bytes(data: &[u8], filename: &str) -> ResolvedInput {
        resolve_input(MediaSource::Bytes {
            data: data.to_vec(),
            filename: filename.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn fingerprint_is_stable_across_runs() {
        let input = resolved_bytes(b"same bytes", "a.wav");
        assert_eq!(compute_binary_hash(&input), compute_binary_hash(&input));
    }

    #[test]
    fn fingerprint_is_independent_of_filename() {
        let a = resolved_bytes(b"identical payload", "first.wav");
        let b = resolved_bytes(b"identical payload", "second.mp4");
        assert_eq!(compute_binary_hash(&a), compute_binary_hash(&b));

        let c = resolved_bytes(b"different payload", "first.wav");
        assert_ne!(compute_binary_hash(&a), compute_binary_hash(&c));
    }

    #[test]
    fn fingerprint_matches_between_path_and_bytes() {
        let payload = b"on disk and in memory";
        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(payload).unwrap();
        file.flush().unwrap();

        let from_path =
            resolve_input(MediaSource::Path(file.path().to_path_buf())).unwrap();
        let from_bytes = resolved_bytes(payload, "anything.wav");
        assert_eq!(
            compute_binary_hash(&from_path),
            compute_binary_hash(&from_bytes)
        );
    }

    #[test]
    fn unreadable_path_falls_back_to_filename_hash() {
        let input = ResolvedInput {
            source: MediaSource::Path(PathBuf::from("/no/such/input.wav")),
            filename: "input.wav".to_string(),
        };
        let mut expected = Sha256::new();
        expected.update(b"input.wav");
        assert_eq!(compute_binary_hash(&input), hex_digest(&expected.finalize()));
    }

    #[test]
    fn temp_spill_preserves_the_extension() {
        let temp = write_temp_source(b"data", "clip.mp4").unwrap();
        assert!(temp.to_string_lossy().ends_with(".mp4"));
        let bare = write_temp_source(b"data", "noext").unwrap();
        assert!(bare.to_string_lossy().ends_with(".bin"));
    }
}
