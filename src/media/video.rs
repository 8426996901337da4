//! Keyframe sampling via ffmpeg scene detection, with uniform fallback.

use crate::error::{Result, TranscribeError};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub const DEFAULT_MAX_FRAMES: usize = 16;
pub const DEFAULT_SCENE_THRESHOLD: f64 = 0.3;

/// One extracted frame paired with its presentation timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    pub path: PathBuf,
    pub timestamp_sec: f64,
}

/// Ordered keyframes plus ownership of the directory holding the frame
/// files; dropping the set removes them.
#[derive(Debug)]
pub struct KeyframeSet {
    frames: Vec<Keyframe>,
    _dir: Option<TempDir>,
}

impl KeyframeSet {
    /// Build a set from pre-existing frames. Used by test doubles; no
    /// directory ownership is taken.
    pub fn from_frames(frames: Vec<Keyframe>) -> Self {
        Self { frames, _dir: None }
    }

    pub fn frames(&self) -> &[Keyframe] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Seam for keyframe sampling, so tests can substitute a double.
pub trait KeyframeSource: Send + Sync {
    fn extract(&self, video: &Path) -> Result<KeyframeSet>;
}

/// Default sampler shelling out to `ffmpeg` with a scene-change filter.
pub struct SceneKeyframeExtractor {
    pub max_frames: usize,
    pub scene_threshold: f64,
}

impl Default for SceneKeyframeExtractor {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            scene_threshold: DEFAULT_SCENE_THRESHOLD,
        }
    }
}

impl KeyframeSource for SceneKeyframeExtractor {
    fn extract(&self, video: &Path) -> Result<KeyframeSet> {
        extract_keyframes(video, self.max_frames, self.scene_threshold)
    }
}

/// Extract visually distinct frames with their timestamps.
///
/// The scene-change pass selects frames whose inter-frame difference exceeds
/// `scene_threshold` (plus the first frame unconditionally). When that pass
/// fails or yields nothing, a one-frame-per-second pass runs instead. An
/// empty result after both passes is not an error.
pub fn extract_keyframes(
    video: &Path,
    max_frames: usize,
    scene_threshold: f64,
) -> Result<KeyframeSet> {
    info!("extracting keyframes for {}", video.display());

    if !video.exists() {
        return Err(TranscribeError::NotFound(video.to_path_buf()));
    }

    let dir = tempfile::Builder::new().prefix("keyframes_").tempdir()?;
    let pattern = dir.path().join("frame_%04d.jpg");

    let scene_vf = format!("select='gt(scene,{})+eq(n,0)',showinfo", scene_threshold);
    let stderr = match run_ffmpeg_extract(video, &pattern, &scene_vf) {
        Ok(stderr) => stderr,
        Err(e) => {
            warn!("scene-based keyframe extraction failed ({}); falling back to uniform sampling", e);
            cleanup_frames(dir.path());
            run_ffmpeg_extract(video, &pattern, "fps=1,showinfo")?
        }
    };

    let mut timestamps = parse_pts_times(&stderr);
    let mut frames = list_frames(dir.path());

    // The fallback pass always runs when the primary pass came back empty,
    // even if ffmpeg itself exited cleanly.
    if frames.is_empty() {
        warn!("scene detection produced no frames; using uniform sampling fallback");
        cleanup_frames(dir.path());
        let stderr = run_ffmpeg_extract(video, &pattern, "fps=1,showinfo")?;
        timestamps = parse_pts_times(&stderr);
        frames = list_frames(dir.path());
    }

    if frames.is_empty() {
        info!("uniform sampling fallback also produced no frames for {}", video.display());
        return Ok(KeyframeSet {
            frames: Vec::new(),
            _dir: Some(dir),
        });
    }

    if frames.len() != timestamps.len() {
        warn!(
            "frame count ({}) and timestamp count ({}) disagree, truncating to shorter",
            frames.len(),
            timestamps.len()
        );
    }

    let pairs: Vec<Keyframe> = frames
        .into_iter()
        .zip(timestamps)
        .map(|(path, timestamp_sec)| Keyframe { path, timestamp_sec })
        .collect();
    let pairs = downsample(pairs, max_frames);

    info!("extracted {} keyframes", pairs.len());
    Ok(KeyframeSet {
        frames: pairs,
        _dir: Some(dir),
    })
}

fn run_ffmpeg_extract(video: &Path, pattern: &Path, vf_expr: &str) -> Result<String> {
    debug!("ffmpeg keyframe pass, vf={}", vf_expr);
    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(video)
        .args(["-vf", vf_expr, "-vsync", "vfr", "-q:v", "2"])
        .arg(pattern)
        .arg("-y")
        .output()?;

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    debug!("ffmpeg exit status: {}", output.status);
    if !output.status.success() {
        return Err(TranscribeError::ConversionFailed(format!(
            "ffmpeg keyframe extraction failed: {}",
            stderr.trim()
        )));
    }
    Ok(stderr)
}

/// Pull `pts_time:<float>` values out of ffmpeg's showinfo diagnostics, in
/// emission order. Unparseable values are skipped.
pub(crate) fn parse_pts_times(stderr: &str) -> Vec<f64> {
    let mut timestamps = Vec::new();
    for line in stderr.lines() {
        let Some(idx) = line.find("pts_time:") else {
            continue;
        };
        let rest = &line[idx + "pts_time:".len()..];
        let number: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        match number.parse::<f64>() {
            Ok(ts) => timestamps.push(ts),
            Err(_) => debug!("failed to parse pts_time from line: {}", line),
        }
    }
    timestamps
}

/// Keep at most `max_frames` frames: every stride-th element with
/// `stride = max(1, count / max_frames)`, then a hard truncate. Preserves
/// temporal order with approximately even coverage.
pub(crate) fn downsample(frames: Vec<Keyframe>, max_frames: usize) -> Vec<Keyframe> {
    if max_frames == 0 {
        return Vec::new();
    }
    if frames.len() <= max_frames {
        return frames;
    }
    let stride = (frames.len() / max_frames).max(1);
    frames
        .into_iter()
        .step_by(stride)
        .take(max_frames)
        .collect()
}

fn list_frames(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut frames: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("frame_") && n.ends_with(".jpg"))
        })
        .collect();
    frames.sort();
    frames
}

fn cleanup_frames(dir: &Path) {
    for frame in list_frames(dir) {
        let _ = std::fs::remove_file(frame);
    }
}
