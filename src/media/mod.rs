//! External media handling: ffmpeg-backed audio and keyframe extraction.

pub mod audio;
pub mod video;

pub use audio::{AudioExtractor, AudioOutcome, FfmpegAudioExtractor};
pub use video::{Keyframe, KeyframeSet, KeyframeSource, SceneKeyframeExtractor};
