//! Conversation model: timestamped items, ordering, and line rendering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Marker pair wrapping keyframe-derived lines in rendered output.
pub const KEYFRAME_START: &str = "[[KEYFRAME_START]]";
pub const KEYFRAME_END: &str = "[[KEYFRAME_END]]";

/// A single transcribed word with optional timing in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationWord {
    pub text: String,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

/// Which producer created an item. Rendering dispatches on this tag instead
/// of sniffing marker strings out of the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemOrigin {
    Speech,
    Visual,
}

/// One timestamped unit of transcript output, from either the speech path
/// or the keyframe-caption path. Timestamps are milliseconds throughout;
/// producers convert at their boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationItem {
    pub text: String,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub speaker_id: Option<i64>,
    pub speaker: Option<String>,
    pub words: Vec<ConversationWord>,
    pub origin: ItemOrigin,
}

impl ConversationItem {
    /// Speech segment without speaker or word detail.
    pub fn speech(text: impl Into<String>, start_ms: Option<u64>, end_ms: Option<u64>) -> Self {
        Self {
            text: text.into(),
            start_ms,
            end_ms,
            speaker_id: None,
            speaker: None,
            words: Vec::new(),
            origin: ItemOrigin::Speech,
        }
    }

    /// Keyframe caption. The first text line carries frame metadata; the
    /// 1 ms span is a placeholder since keyframes have no natural duration.
    pub fn visual(description: &str, frame_index: usize, timestamp_sec: f64) -> Self {
        let start_ms = (timestamp_sec * 1000.0) as u64;
        Self {
            text: format!("frame={};time={:.3}s\n{}", frame_index, timestamp_sec, description),
            start_ms: Some(start_ms),
            end_ms: Some(start_ms + 1),
            speaker_id: None,
            speaker: None,
            words: Vec::new(),
            origin: ItemOrigin::Visual,
        }
    }

    /// Items with absent timestamps sort after all items that have one;
    /// ties fall through to end time (same rule) and finally the text.
    fn sort_key(&self) -> (bool, u64, bool, u64, &str) {
        (
            self.start_ms.is_none(),
            self.start_ms.unwrap_or(0),
            self.end_ms.is_none(),
            self.end_ms.unwrap_or(0),
            self.text.as_str(),
        )
    }

    /// Render the item as a single document line (visual items may span
    /// multiple physical lines between the keyframe markers).
    pub fn render(&self) -> String {
        let time_tag = format!("[time: {}-{}]", format_ms(self.start_ms), format_ms(self.end_ms));

        match self.origin {
            ItemOrigin::Visual => {
                let (meta, body) = match self.text.split_once('\n') {
                    Some((head, rest)) => (head, Some(rest)),
                    None => (self.text.as_str(), None),
                };
                let mut header = format!("{} {}", KEYFRAME_START, time_tag);
                if !meta.is_empty() {
                    header.push(' ');
                    header.push_str(meta);
                }
                match body {
                    Some(rest) => format!("{}\n{}\n{}", header, rest, KEYFRAME_END),
                    None => format!("{}\n{}", header, KEYFRAME_END),
                }
            }
            ItemOrigin::Speech => {
                let mut chunks = vec![time_tag];
                if let Some(ref speaker) = self.speaker {
                    chunks.push(format!("[speaker:{}]", speaker));
                }
                chunks.push(self.text.clone());
                chunks.join(" ")
            }
        }
    }
}

impl Ord for ConversationItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ConversationItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Format milliseconds as `HH:MM:SS.mmm`, or a placeholder when unset.
pub fn format_ms(ms: Option<u64>) -> String {
    match ms {
        None => "--:--:--.---".to_string(),
        Some(ms) => {
            let hours = ms / 3_600_000;
            let mins = (ms % 3_600_000) / 60_000;
            let secs = (ms % 60_000) / 1_000;
            let millis = ms % 1_000;
            format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
        }
    }
}
