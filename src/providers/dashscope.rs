//! DashScope-compatible speech-to-text client.
//!
//! Strategy chain: an async transcription job against already-hosted URLs,
//! an upload-then-job path for local bytes, and finally a direct synchronous
//! request against the simpler generation endpoint.

use crate::config::AsrSettings;
use crate::conversation::{ConversationItem, ConversationWord, ItemOrigin};
use crate::error::{Result, TranscribeError};
use crate::providers::{RetryPolicy, SpeechToText};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

const TASK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Failure from the upload/async-job path. `Fatal` aborts the whole
/// transcription; `Transport` means the integration was unreachable and the
/// direct endpoint should be tried instead.
enum JobError {
    Fatal(TranscribeError),
    Transport(String),
}

#[derive(Debug)]
pub struct DashScopeAsrClient {
    settings: AsrSettings,
    api_key: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl DashScopeAsrClient {
    pub fn new(settings: AsrSettings) -> Result<Self> {
        let api_key = settings.api_key.clone().filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            TranscribeError::AsrService(
                "ASR API key is missing. Set ALIYUN_BAILIAN_API_KEY or DASHSCOPE_API_KEY, or pass settings explicitly.".to_string(),
            )
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| TranscribeError::AsrService(format!("failed to build HTTP client: {}", e)))?;
        let retry = RetryPolicy::new(settings.retries);
        Ok(Self {
            settings,
            api_key,
            http,
            retry,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(AsrSettings::from_env())
    }

    fn language_or_default<'a>(&'a self, language: &'a str) -> &'a str {
        if language.trim().is_empty() {
            &self.settings.language
        } else {
            language
        }
    }

    fn job_parameters(&self, language: &str) -> Value {
        json!({
            "language": self.language_or_default(language),
            "enable_words": self.settings.enable_words,
            "enable_diarization": self.settings.diarization,
        })
    }

    // Async-job path ------------------------------------------------------

    async fn transcribe_async(
        &self,
        data: &[u8],
        filename: &str,
        language: &str,
    ) -> std::result::Result<Vec<ConversationItem>, JobError> {
        let file_urls = self.upload_audio(data, filename).await?;
        info!("uploaded audio, obtained file_urls={:?}", file_urls);
        self.run_async_job(&file_urls, language).await
    }

    async fn run_async_job(
        &self,
        file_urls: &[String],
        language: &str,
    ) -> std::result::Result<Vec<ConversationItem>, JobError> {
        let task_id = self.submit_async_job(file_urls, language).await?;
        info!("transcription task submitted: {}", task_id);
        let output = self.wait_for_task(&task_id).await?;
        self.fetch_async_result(&output).await
    }

    async fn submit_async_job(
        &self,
        file_urls: &[String],
        language: &str,
    ) -> std::result::Result<String, JobError> {
        let url = format!(
            "{}/services/audio/asr/transcription",
            self.settings.base_http_api_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.settings.model,
            "input": { "file_urls": file_urls },
            "parameters": self.job_parameters(language),
        });

        info!("submitting async transcription request for {} file(s)", file_urls.len());
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-DashScope-Async", "enable")
            .json(&body)
            .send()
            .await
            .map_err(|e| JobError::Transport(format!("task submission failed: {}", e)))?;

        let status = response.status();
        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return Err(JobError::Fatal(TranscribeError::AsrService(format!(
                    "task submission returned invalid JSON: {}",
                    e
                ))))
            }
        };
        debug!("task submission response: {}", payload);

        if !status.is_success() {
            return Err(JobError::Fatal(TranscribeError::AsrService(format!(
                "async task submission failed with status {}: {}",
                status, payload
            ))));
        }

        payload
            .pointer("/output/task_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                JobError::Fatal(TranscribeError::AsrService(format!(
                    "task submission response did not include task_id: {}",
                    payload
                )))
            })
    }

    async fn wait_for_task(&self, task_id: &str) -> std::result::Result<Value, JobError> {
        let url = format!(
            "{}/tasks/{}",
            self.settings.base_http_api_url.trim_end_matches('/'),
            task_id
        );
        let max_polls = self.settings.timeout_secs.max(1);

        for _ in 0..max_polls {
            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|e| JobError::Transport(format!("task poll failed: {}", e)))?;
            let payload: Value = response.json().await.map_err(|e| {
                JobError::Fatal(TranscribeError::AsrService(format!(
                    "task poll returned invalid JSON: {}",
                    e
                )))
            })?;

            let task_status = payload
                .pointer("/output/task_status")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN");
            debug!("task {} status: {}", task_id, task_status);

            match task_status {
                "SUCCEEDED" => {
                    return Ok(payload.get("output").cloned().unwrap_or(Value::Null));
                }
                "FAILED" | "CANCELED" => {
                    let message = payload
                        .pointer("/output/message")
                        .and_then(Value::as_str)
                        .unwrap_or("no failure detail");
                    return Err(JobError::Fatal(TranscribeError::AsrService(format!(
                        "transcription task {} ended as {}: {}",
                        task_id, task_status, message
                    ))));
                }
                _ => tokio::time::sleep(TASK_POLL_INTERVAL).await,
            }
        }

        Err(JobError::Fatal(TranscribeError::AsrService(format!(
            "transcription task {} did not finish within {} polls",
            task_id, max_polls
        ))))
    }

    /// Resolve a finished task's output to conversation items. The output
    /// either carries segments inline or references externally stored
    /// transcript data that has to be fetched and normalized.
    async fn fetch_async_result(
        &self,
        output: &Value,
    ) -> std::result::Result<Vec<ConversationItem>, JobError> {
        if segments_value(output).is_some() {
            return Ok(parse_items(output));
        }

        let transcription_url = output
            .pointer("/results/0/transcription_url")
            .and_then(Value::as_str);
        let Some(url) = transcription_url else {
            warn!("no inline segments and no transcription URL in task output");
            return Ok(Vec::new());
        };

        info!("downloading transcription from task result URL");
        let response = self.http.get(url).send().await.map_err(|e| {
            JobError::Fatal(TranscribeError::AsrService(format!(
                "failed to download transcription: {}",
                e
            )))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(JobError::Fatal(TranscribeError::AsrService(format!(
                "failed to download transcription: status {}",
                status
            ))));
        }

        let data: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("failed to decode transcription JSON: {}", e);
                return Ok(Vec::new());
            }
        };

        if let Some(transcripts) = data.get("transcripts").filter(|t| t.is_array()) {
            debug!("detected nested transcripts format, flattening");
            let flattened = json!({ "segments": flatten_transcripts(transcripts) });
            return Ok(parse_items(&flattened));
        }
        Ok(parse_items(&data))
    }

    async fn upload_audio(
        &self,
        data: &[u8],
        filename: &str,
    ) -> std::result::Result<Vec<String>, JobError> {
        let endpoint = &self.settings.file_upload_endpoint;
        info!("uploading {} byte(s) to {}", data.len(), endpoint);

        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| JobError::Transport(format!("audio upload failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::Fatal(TranscribeError::AsrService(format!(
                "file upload failed with status {}: {}",
                status, body
            ))));
        }

        let payload: Value = response.json().await.map_err(|e| {
            JobError::Fatal(TranscribeError::AsrService(format!(
                "file upload returned invalid JSON: {}",
                e
            )))
        })?;
        debug!("upload response: {}", payload);

        let urls = extract_file_urls(&payload);
        if urls.is_empty() {
            return Err(JobError::Fatal(TranscribeError::AsrService(
                "file upload did not return any file_urls".to_string(),
            )));
        }
        Ok(urls)
    }

    // Direct fallback ------------------------------------------------------

    async fn transcribe_direct(
        &self,
        data: &[u8],
        filename: &str,
        language: &str,
    ) -> Result<Vec<ConversationItem>> {
        info!("using direct API transcription fallback");
        let payload = json!({
            "model": self.settings.model,
            "input": { "parameters": self.job_parameters(language) },
        });

        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            info!("direct transcription attempt {}/{}", attempt, self.retry.max_attempts);

            let file_part =
                reqwest::multipart::Part::bytes(data.to_vec()).file_name(filename.to_string());
            let payload_part = reqwest::multipart::Part::text(payload.to_string())
                .mime_str("application/json")
                .map_err(|e| TranscribeError::AsrService(e.to_string()))?;
            let form = reqwest::multipart::Form::new()
                .part("file", file_part)
                .part("payload", payload_part);

            match self
                .http
                .post(&self.settings.endpoint)
                .bearer_auth(&self.api_key)
                .multipart(form)
                .send()
                .await
            {
                Ok(resp)
                    if self.retry.is_retryable_status(resp.status().as_u16())
                        && self.retry.has_attempts_left(attempt) =>
                {
                    warn!(
                        "server error (status {}), retrying in {:?}",
                        resp.status(),
                        self.retry.backoff_delay(attempt)
                    );
                    self.retry.wait(attempt).await;
                }
                Ok(resp) => break resp,
                Err(e) if self.retry.has_attempts_left(attempt) => {
                    warn!("request failed on attempt {}: {}, retrying", attempt, e);
                    self.retry.wait(attempt).await;
                }
                Err(e) => {
                    return Err(TranscribeError::AsrService(format!(
                        "network error during transcription: {}",
                        e
                    )))
                }
            }
        };

        let status = response.status();
        info!("direct transcription response status: {}", status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::AsrService(format!(
                "transcription request failed with status {}: {}",
                status, body
            )));
        }

        let content: Value = response.json().await.map_err(|e| {
            TranscribeError::AsrService(format!("failed to decode JSON response: {}", e))
        })?;
        debug!("direct transcription response: {}", content);

        if let Some(code) = content.get("code").and_then(Value::as_str) {
            if code != "Success" {
                return Err(TranscribeError::AsrService(format!(
                    "service returned error code={}, request_id={}",
                    code,
                    content
                        .get("request_id")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                )));
            }
        }

        let result = content
            .get("data")
            .or_else(|| content.get("output"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        let items = parse_items(&result);
        info!("parsed {} conversation items", items.len());
        Ok(items)
    }
}

#[async_trait]
impl SpeechToText for DashScopeAsrClient {
    async fn transcribe_path(
        &self,
        audio_path: &Path,
        language: &str,
    ) -> Result<Vec<ConversationItem>> {
        let data = std::fs::read(audio_path)?;
        let filename = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav");
        self.transcribe_bytes(data, filename, language).await
    }

    async fn transcribe_bytes(
        &self,
        data: Vec<u8>,
        filename: &str,
        language: &str,
    ) -> Result<Vec<ConversationItem>> {
        info!("starting transcription for {} ({} bytes)", filename, data.len());
        match self.transcribe_async(&data, filename, language).await {
            Ok(items) => Ok(items),
            Err(JobError::Fatal(e)) => Err(e),
            Err(JobError::Transport(msg)) => {
                warn!("async upload path unavailable ({}), falling back to direct API", msg);
                self.transcribe_direct(&data, filename, language).await
            }
        }
    }

    async fn transcribe_remote_urls(
        &self,
        file_urls: &[String],
        language: &str,
    ) -> Result<Vec<ConversationItem>> {
        if file_urls.is_empty() {
            return Err(TranscribeError::AsrService(
                "file_urls must not be empty".to_string(),
            ));
        }
        // No fallback below the async job when the caller hosts the audio.
        match self.run_async_job(file_urls, language).await {
            Ok(items) => Ok(items),
            Err(JobError::Fatal(e)) => Err(e),
            Err(JobError::Transport(msg)) => Err(TranscribeError::AsrService(msg)),
        }
    }
}

// Response normalization ---------------------------------------------------

/// Segment list under its alias names; first non-empty array wins.
fn segments_value(result: &Value) -> Option<&Vec<Value>> {
    for name in ["segments", "sentences"] {
        if let Some(list) = result.get(name).and_then(Value::as_array) {
            if !list.is_empty() {
                return Some(list);
            }
        }
    }
    None
}

/// Normalize a segment list (any alias shape) into conversation items.
pub(crate) fn parse_items(result: &Value) -> Vec<ConversationItem> {
    let Some(segments) = segments_value(result) else {
        return Vec::new();
    };

    segments
        .iter()
        .map(|segment| {
            let words = segment
                .get("words")
                .and_then(Value::as_array)
                .map(|words| {
                    words
                        .iter()
                        .map(|word| ConversationWord {
                            text: field_str(word, &["text", "word"]).unwrap_or_default(),
                            start_ms: field_ms(word, &["start", "start_time"]),
                            end_ms: field_ms(word, &["end", "end_time"]),
                        })
                        .collect()
                })
                .unwrap_or_default();

            ConversationItem {
                text: field_str(segment, &["text", "sentence"])
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                start_ms: field_ms(segment, &["start", "begin_time"]),
                end_ms: field_ms(segment, &["end", "end_time"]),
                speaker_id: field_i64(segment, &["speaker_id", "speaker"]),
                speaker: field_str(segment, &["speaker_label"]),
                words,
                origin: ItemOrigin::Speech,
            }
        })
        .collect()
}

/// Flatten the provider-specific `transcripts -> sentences -> words` shape
/// into the canonical segment list.
pub(crate) fn flatten_transcripts(transcripts: &Value) -> Value {
    let mut segments = Vec::new();
    for transcript in transcripts.as_array().into_iter().flatten() {
        let sentences = transcript.get("sentences").and_then(Value::as_array);
        for sentence in sentences.into_iter().flatten() {
            let words: Vec<Value> = sentence
                .get("words")
                .and_then(Value::as_array)
                .map(|words| {
                    words
                        .iter()
                        .map(|word| {
                            json!({
                                "text": word.get("text").cloned().unwrap_or(Value::Null),
                                "start": word.get("begin_time").cloned().unwrap_or(Value::Null),
                                "end": word.get("end_time").cloned().unwrap_or(Value::Null),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            segments.push(json!({
                "text": sentence.get("text").cloned().unwrap_or(json!("")),
                "start": sentence.get("begin_time").cloned().unwrap_or(Value::Null),
                "end": sentence.get("end_time").cloned().unwrap_or(Value::Null),
                "words": words,
                "speaker_label": transcript.get("speaker_label").cloned().unwrap_or(Value::Null),
                "speaker_id": transcript.get("speaker_id").cloned().unwrap_or(Value::Null),
                "speaker": transcript.get("speaker").cloned().unwrap_or(Value::Null),
            }));
        }
    }
    Value::Array(segments)
}

/// File URLs out of an upload response; the field moves between shapes.
pub(crate) fn extract_file_urls(payload: &Value) -> Vec<String> {
    const RULES: &[&str] = &[
        "/output/file_urls",
        "/file_urls",
        "/data/file_urls",
        "/data/urls",
    ];
    for pointer in RULES {
        let Some(value) = payload.pointer(pointer) else {
            continue;
        };
        match value {
            Value::String(url) if !url.is_empty() => return vec![url.clone()],
            Value::Array(urls) if !urls.is_empty() => {
                return urls
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            }
            _ => {}
        }
    }
    Vec::new()
}

fn field_str(obj: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| obj.get(*name).and_then(Value::as_str))
        .map(str::to_string)
}

/// Numeric field in provider-native milliseconds.
fn field_ms(obj: &Value, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| {
        let value = obj.get(*name)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().map(|f| f.max(0.0) as u64))
    })
}

fn field_i64(obj: &Value, names: &[&str]) -> Option<i64> {
    names
        .iter()
        .find_map(|name| obj.get(*name).and_then(Value::as_i64))
}
