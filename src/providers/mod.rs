//! Pluggable speech-to-text and keyframe-caption providers.

mod dashscope;
mod retry;
mod vision;

pub use dashscope::DashScopeAsrClient;
pub use retry::RetryPolicy;
pub use vision::DashScopeVisionClient;

use crate::conversation::ConversationItem;
use crate::error::Result;
use crate::media::Keyframe;
use async_trait::async_trait;
use std::path::Path;

/// Speech-to-text provider contract. Implementations return items ordered
/// as the service emitted them; the document stage imposes the final order.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe_path(
        &self,
        audio_path: &Path,
        language: &str,
    ) -> Result<Vec<ConversationItem>>;

    async fn transcribe_bytes(
        &self,
        data: Vec<u8>,
        filename: &str,
        language: &str,
    ) -> Result<Vec<ConversationItem>>;

    /// Transcribe audio the caller already hosted at the provider.
    async fn transcribe_remote_urls(
        &self,
        file_urls: &[String],
        language: &str,
    ) -> Result<Vec<ConversationItem>>;
}

/// Keyframe-caption provider contract. Frames that fail are skipped, not
/// fatal to the batch.
#[async_trait]
pub trait KeyframeCaptioner: Send + Sync {
    async fn describe_frames(&self, frames: &[Keyframe]) -> Result<Vec<ConversationItem>>;
}
