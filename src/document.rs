//! Final transcript document assembly.

use crate::conversation::ConversationItem;
use log::{debug, info};
use serde::Serialize;

/// Where the document came from: filename, declared media type, and the
/// sha256 fingerprint of the exact input bytes.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOrigin {
    pub filename: String,
    pub mimetype: String,
    pub binary_hash: String,
}

/// Ordered rendered transcript lines plus origin metadata.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptDocument {
    pub name: String,
    pub origin: DocumentOrigin,
    pub texts: Vec<String>,
}

impl TranscriptDocument {
    pub fn to_plain_text(&self) -> String {
        self.texts.join("\n")
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Assemble the document: optional summary line first, then every item
/// rendered in conversation order.
pub fn build_document(
    filename: &str,
    mimetype: &str,
    binary_hash: String,
    mut conversation: Vec<ConversationItem>,
    summary: Option<&str>,
) -> TranscriptDocument {
    info!(
        "building document for {} with {} conversation item(s)",
        filename,
        conversation.len()
    );

    let mut texts = Vec::with_capacity(conversation.len() + 1);
    if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        texts.push(format!("[summary] {}", summary));
    }

    conversation.sort();
    for item in &conversation {
        let line = item.render();
        debug!("document line: {:.80}", line);
        texts.push(line);
    }

    TranscriptDocument {
        name: filename.to_string(),
        origin: DocumentOrigin {
            filename: filename.to_string(),
            mimetype: mimetype.to_string(),
            binary_hash,
        },
        texts,
    }
}
