//! End-to-end pipeline tests with mock providers. No network and no ffmpeg:
//! audio extraction and keyframe sourcing are swapped for test doubles.

use async_trait::async_trait;
use av_scribe::conversation::{ConversationItem, KEYFRAME_START};
use av_scribe::error::{Result, TranscribeError};
use av_scribe::input::MediaSource;
use av_scribe::media::{AudioExtractor, AudioOutcome, Keyframe, KeyframeSet, KeyframeSource};
use av_scribe::pipeline::{Pipeline, TranscribeOptions};
use av_scribe::providers::{KeyframeCaptioner, SpeechToText};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct MockAsr {
    items: Vec<ConversationItem>,
    fail: bool,
}

impl MockAsr {
    fn returning(items: Vec<ConversationItem>) -> Self {
        Self { items, fail: false }
    }

    fn failing() -> Self {
        Self {
            items: Vec::new(),
            fail: true,
        }
    }

    fn respond(&self) -> Result<Vec<ConversationItem>> {
        if self.fail {
            Err(TranscribeError::AsrService(
                "service rejected the request".to_string(),
            ))
        } else {
            Ok(self.items.clone())
        }
    }
}

#[async_trait]
impl SpeechToText for MockAsr {
    async fn transcribe_path(&self, _path: &Path, _language: &str) -> Result<Vec<ConversationItem>> {
        self.respond()
    }

    async fn transcribe_bytes(
        &self,
        _data: Vec<u8>,
        _filename: &str,
        _language: &str,
    ) -> Result<Vec<ConversationItem>> {
        self.respond()
    }

    async fn transcribe_remote_urls(
        &self,
        _file_urls: &[String],
        _language: &str,
    ) -> Result<Vec<ConversationItem>> {
        self.respond()
    }
}

struct MockCaptioner {
    called: Arc<AtomicBool>,
}

impl MockCaptioner {
    fn new() -> (Self, Arc<AtomicBool>) {
        let called = Arc::new(AtomicBool::new(false));
        (
            Self {
                called: Arc::clone(&called),
            },
            called,
        )
    }
}

#[async_trait]
impl KeyframeCaptioner for MockCaptioner {
    async fn describe_frames(&self, frames: &[Keyframe]) -> Result<Vec<ConversationItem>> {
        self.called.store(true, Ordering::SeqCst);
        Ok(frames
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                ConversationItem::visual(
                    &format!("scene {}", i + 1),
                    i + 1,
                    frame.timestamp_sec,
                )
            })
            .collect())
    }
}

struct SilentAudio;

impl AudioExtractor for SilentAudio {
    fn ensure_wav(&self, _source: &Path) -> Result<AudioOutcome> {
        Ok(AudioOutcome::NoAudioStream)
    }
}

struct FixedKeyframes {
    timestamps: Vec<f64>,
}

impl KeyframeSource for FixedKeyframes {
    fn extract(&self, _video: &Path) -> Result<KeyframeSet> {
        let frames = self
            .timestamps
            .iter()
            .map(|&t| Keyframe {
                path: PathBuf::from(format!("frame_{t:.1}.jpg")),
                timestamp_sec: t,
            })
            .collect();
        Ok(KeyframeSet::from_frames(frames))
    }
}

fn write_test_wav() -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
    for i in 0..1600 {
        writer.write_sample(((i % 100) * 300 - 15_000) as i16).unwrap();
    }
    writer.finalize().unwrap();
    file
}

#[tokio::test]
async fn audio_file_produces_a_timed_transcript() {
    let wav = write_test_wav();
    let asr = MockAsr::returning(vec![ConversationItem::speech(
        "hello world",
        Some(0),
        Some(1200),
    )]);
    let pipeline = Pipeline::new(Box::new(asr), None);

    let result = pipeline
        .transcribe_with_artifacts(
            MediaSource::Path(wav.path().to_path_buf()),
            &TranscribeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.document.texts.len(), 1);
    let line = &result.document.texts[0];
    assert!(line.contains("00:00:00.000-00:00:01.200"), "line: {line}");
    assert!(line.contains("hello world"));
    // A wav input is its own artifact; nothing was converted.
    assert_eq!(result.audio_path.as_deref(), Some(wav.path()));
    assert_eq!(result.document.origin.mimetype, "audio/wav");
}

#[tokio::test]
async fn silent_video_falls_back_to_keyframe_captions() {
    let mut video = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    std::io::Write::write_all(&mut video, b"not a real container").unwrap();

    let (captioner, called) = MockCaptioner::new();
    let pipeline = Pipeline::new(
        Box::new(MockAsr::returning(Vec::new())),
        Some(Box::new(captioner)),
    )
    .with_audio_extractor(Box::new(SilentAudio))
    .with_keyframe_source(Box::new(FixedKeyframes {
        // Deliberately unsorted to exercise document ordering.
        timestamps: vec![7.2, 0.0, 3.5],
    }));

    let result = pipeline
        .transcribe_with_artifacts(
            MediaSource::Path(video.path().to_path_buf()),
            &TranscribeOptions::default(),
        )
        .await
        .unwrap();

    assert!(called.load(Ordering::SeqCst));
    assert!(result.audio_path.is_none());
    assert_eq!(result.document.texts.len(), 3);
    for line in &result.document.texts {
        assert!(line.contains(KEYFRAME_START), "line: {line}");
    }
    let positions: Vec<usize> = ["time=0.000s", "time=3.500s", "time=7.200s"]
        .iter()
        .map(|needle| {
            result
                .document
                .texts
                .iter()
                .position(|l| l.contains(needle))
                .unwrap_or_else(|| panic!("missing {needle}"))
        })
        .collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(result.document.origin.mimetype, "video/mp4");
}

#[tokio::test]
async fn asr_failure_aborts_the_pipeline() {
    let wav = write_test_wav();
    let pipeline = Pipeline::new(Box::new(MockAsr::failing()), None);

    let err = pipeline
        .transcribe(
            MediaSource::Path(wav.path().to_path_buf()),
            &TranscribeOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TranscribeError::AsrService(_)));
}

#[tokio::test]
async fn empty_audio_transcript_does_not_trigger_vision() {
    // Zero items from an audio-only file: no keyframes to fall back to.
    let wav = write_test_wav();
    let (captioner, called) = MockCaptioner::new();
    let pipeline = Pipeline::new(
        Box::new(MockAsr::returning(Vec::new())),
        Some(Box::new(captioner)),
    );

    let document = pipeline
        .transcribe(
            MediaSource::Path(wav.path().to_path_buf()),
            &TranscribeOptions::default(),
        )
        .await
        .unwrap();

    assert!(!called.load(Ordering::SeqCst));
    assert!(document.texts.is_empty());
}

#[tokio::test]
async fn video_with_speech_skips_the_visual_fallback() {
    let mut video = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    std::io::Write::write_all(&mut video, b"container bytes").unwrap();

    struct WavEcho(PathBuf);
    impl AudioExtractor for WavEcho {
        fn ensure_wav(&self, _source: &Path) -> Result<AudioOutcome> {
            Ok(AudioOutcome::Wav(self.0.clone()))
        }
    }

    let wav = write_test_wav();
    let (captioner, called) = MockCaptioner::new();
    let pipeline = Pipeline::new(
        Box::new(MockAsr::returning(vec![ConversationItem::speech(
            "narration",
            Some(500),
            Some(900),
        )])),
        Some(Box::new(captioner)),
    )
    .with_audio_extractor(Box::new(WavEcho(wav.path().to_path_buf())));

    let result = pipeline
        .transcribe_with_artifacts(
            MediaSource::Path(video.path().to_path_buf()),
            &TranscribeOptions::default(),
        )
        .await
        .unwrap();

    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(result.document.texts.len(), 1);
    assert!(result.document.texts[0].contains("narration"));
}

#[tokio::test]
async fn bytes_input_carries_the_original_filename() {
    let wav = write_test_wav();
    let wav_bytes = std::fs::read(wav.path()).unwrap();

    let pipeline = Pipeline::new(
        Box::new(MockAsr::returning(vec![ConversationItem::speech(
            "from memory",
            Some(0),
            Some(400),
        )])),
        None,
    );

    let document = pipeline
        .transcribe(
            MediaSource::Bytes {
                data: wav_bytes,
                filename: "meeting.wav".to_string(),
            },
            &TranscribeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(document.origin.filename, "meeting.wav");
    assert_eq!(document.name, "meeting.wav");
    assert!(document.texts[0].contains("from memory"));
}

#[tokio::test]
async fn summary_option_prepends_a_summary_line() {
    let wav = write_test_wav();
    let pipeline = Pipeline::new(
        Box::new(MockAsr::returning(vec![ConversationItem::speech(
            "body text",
            Some(0),
            Some(100),
        )])),
        None,
    );

    let options = TranscribeOptions {
        summary: Some("weekly sync".to_string()),
        ..TranscribeOptions::default()
    };
    let document = pipeline
        .transcribe(MediaSource::Path(wav.path().to_path_buf()), &options)
        .await
        .unwrap();

    assert_eq!(document.texts.len(), 2);
    assert_eq!(document.texts[0], "[summary] weekly sync");
    assert!(document.texts[1].contains("body text"));
}

#[tokio::test]
async fn missing_input_is_reported_before_any_provider_call() {
    let pipeline = Pipeline::new(Box::new(MockAsr::failing()), None);
    let err = pipeline
        .transcribe(
            MediaSource::Path(PathBuf::from("/no/such/file.wav")),
            &TranscribeOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TranscribeError::NotFound(_)));
}
