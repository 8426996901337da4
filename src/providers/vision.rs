//! DashScope-compatible multimodal client describing keyframes.

use crate::config::VisionSettings;
use crate::conversation::ConversationItem;
use crate::error::{Result, TranscribeError};
use crate::media::Keyframe;
use crate::providers::{KeyframeCaptioner, RetryPolicy};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub struct DashScopeVisionClient {
    settings: VisionSettings,
    api_key: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl DashScopeVisionClient {
    pub fn new(settings: VisionSettings) -> Result<Self> {
        let api_key = settings.api_key.clone().filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            TranscribeError::VisionService(
                "vision API key is missing. Set ALIYUN_BAILIAN_API_KEY or DASHSCOPE_API_KEY, or pass settings explicitly.".to_string(),
            )
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| {
                TranscribeError::VisionService(format!("failed to build HTTP client: {}", e))
            })?;
        let retry = RetryPolicy::new(settings.retries);
        Ok(Self {
            settings,
            api_key,
            http,
            retry,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(VisionSettings::from_env())
    }

    async fn describe_single_frame(&self, frame: &Keyframe) -> Result<String> {
        let payload = self.build_payload(frame)?;
        let response = self.post_with_retry(&payload).await?;
        let text = extract_text(&response)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(TranscribeError::VisionService(
                "vision response did not include text output".to_string(),
            ));
        }
        Ok(text)
    }

    fn build_payload(&self, frame: &Keyframe) -> Result<Value> {
        let image_bytes = std::fs::read(&frame.path)?;
        let data_uri = format!(
            "data:{};base64,{}",
            guess_mime(&frame.path),
            BASE64.encode(&image_bytes)
        );
        let prompt_text = format!("时间戳 {:.3} 秒。{}", frame.timestamp_sec, self.settings.prompt);

        let mut payload = json!({
            "model": self.settings.model,
            "input": {
                "messages": [
                    {
                        "role": "user",
                        "content": [
                            { "image": data_uri },
                            { "text": prompt_text.trim() },
                        ],
                    }
                ],
            },
        });
        if let Some(parameters) = &self.settings.parameters {
            payload["parameters"] = parameters.clone();
        }
        Ok(payload)
    }

    async fn post_with_retry(&self, payload: &Value) -> Result<Value> {
        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            match self
                .http
                .post(&self.settings.endpoint)
                .bearer_auth(&self.api_key)
                .json(payload)
                .send()
                .await
            {
                Ok(resp)
                    if self.retry.is_retryable_status(resp.status().as_u16())
                        && self.retry.has_attempts_left(attempt) =>
                {
                    warn!(
                        "vision API server error ({}) attempt {}/{}, retrying",
                        resp.status(),
                        attempt,
                        self.retry.max_attempts
                    );
                    self.retry.wait(attempt).await;
                }
                Ok(resp) => break resp,
                Err(e) if self.retry.has_attempts_left(attempt) => {
                    warn!(
                        "vision request failed on attempt {}/{}: {}",
                        attempt, self.retry.max_attempts, e
                    );
                    self.retry.wait(attempt).await;
                }
                Err(e) => {
                    return Err(TranscribeError::VisionService(format!(
                        "network error during vision request: {}",
                        e
                    )))
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::VisionService(format!(
                "vision request failed with status {}: {}",
                status, body
            )));
        }
        response.json().await.map_err(|e| {
            TranscribeError::VisionService(format!("failed to decode vision response JSON: {}", e))
        })
    }
}

#[async_trait]
impl KeyframeCaptioner for DashScopeVisionClient {
    async fn describe_frames(&self, frames: &[Keyframe]) -> Result<Vec<ConversationItem>> {
        let mut items = Vec::new();
        for (idx, frame) in frames.iter().enumerate() {
            let index = idx + 1;
            match self.describe_single_frame(frame).await {
                Ok(description) => {
                    debug!("frame {} described ({} chars)", index, description.len());
                    items.push(ConversationItem::visual(
                        &description,
                        index,
                        frame.timestamp_sec,
                    ));
                }
                Err(e) => {
                    // Partial batch failure is acceptable; the frame is skipped.
                    warn!(
                        "vision model failed on frame {} ({}): {}",
                        index,
                        frame.path.display(),
                        e
                    );
                }
            }
        }
        info!("described {}/{} keyframes", items.len(), frames.len());
        Ok(items)
    }
}

fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}

/// The caption text nests under several alternate response shapes. Rules run
/// in order; the first non-empty text wins.
fn extract_text(payload: &Value) -> Option<String> {
    const RULES: &[fn(&Value) -> Option<&str>] = &[
        choice_content_block_text,
        choice_message_text,
        choice_text,
        output_text_field,
        output_as_string,
        top_level_output_text,
    ];
    RULES
        .iter()
        .find_map(|rule| rule(payload))
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}

fn choices(payload: &Value) -> Option<&Vec<Value>> {
    payload.pointer("/output/choices").and_then(Value::as_array)
}

fn non_empty(text: Option<&Value>) -> Option<&str> {
    text.and_then(Value::as_str).filter(|t| !t.trim().is_empty())
}

fn choice_content_block_text(payload: &Value) -> Option<&str> {
    choices(payload)?.iter().find_map(|choice| {
        let blocks = choice.pointer("/message/content")?.as_array()?;
        blocks.iter().find_map(|block| non_empty(block.get("text")))
    })
}

fn choice_message_text(payload: &Value) -> Option<&str> {
    choices(payload)?
        .iter()
        .find_map(|choice| non_empty(choice.pointer("/message/text")))
}

fn choice_text(payload: &Value) -> Option<&str> {
    choices(payload)?
        .iter()
        .find_map(|choice| non_empty(choice.get("text")))
}

fn output_text_field(payload: &Value) -> Option<&str> {
    non_empty(payload.pointer("/output/text"))
}

fn output_as_string(payload: &Value) -> Option<&str> {
    non_empty(payload.get("output"))
}

fn top_level_output_text(payload: &Value) -> Option<&str> {
    non_empty(payload.get("output_text"))
}
