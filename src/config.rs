//! Provider settings with hinted defaults and environment overrides.

use log::debug;

/// Api-key environment entries probed in order; first non-empty wins.
pub const API_KEY_ENVS: &[&str] = &["ALIYUN_BAILIAN_API_KEY", "DASHSCOPE_API_KEY"];

const DEFAULT_BASE_HTTP_API_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
const DEFAULT_ASR_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/audio/asr/generation";
const DEFAULT_VISION_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/multimodal-generation/generation";
const DEFAULT_VISION_PROMPT: &str =
    "请用中文详细描述这张关键帧的场景、主体、动作、文字以及潜在含义。";

/// Settings for the DashScope-compatible ASR service.
#[derive(Debug, Clone)]
pub struct AsrSettings {
    pub api_key: Option<String>,
    /// Root for the async-task workflow (submit, poll, file upload).
    pub base_http_api_url: String,
    /// Direct synchronous endpoint used as the last fallback.
    pub endpoint: String,
    pub file_upload_endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub language: String,
    pub enable_words: bool,
    pub diarization: bool,
}

impl Default for AsrSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_http_api_url: DEFAULT_BASE_HTTP_API_URL.to_string(),
            endpoint: DEFAULT_ASR_ENDPOINT.to_string(),
            file_upload_endpoint: format!("{}/files", DEFAULT_BASE_HTTP_API_URL),
            model: "fun-asr".to_string(),
            timeout_secs: 120,
            retries: 3,
            language: "zh".to_string(),
            enable_words: true,
            diarization: false,
        }
    }
}

impl AsrSettings {
    pub fn from_env() -> Self {
        let base_http_api_url = env_or("DASHSCOPE_BASE_HTTP_API_URL", DEFAULT_BASE_HTTP_API_URL);
        let file_upload_endpoint = env_or(
            "DASHSCOPE_FILE_UPLOAD_ENDPOINT",
            &format!("{}/files", base_http_api_url.trim_end_matches('/')),
        );
        Self {
            api_key: resolve_api_key(API_KEY_ENVS),
            base_http_api_url,
            file_upload_endpoint,
            ..Self::default()
        }
    }
}

/// Settings for the DashScope-compatible multimodal vision service.
#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub prompt: String,
    pub timeout_secs: u64,
    pub retries: u32,
    /// Extra request parameters merged into the payload verbatim.
    pub parameters: Option<serde_json::Value>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            model: "qwen-vl-max".to_string(),
            prompt: DEFAULT_VISION_PROMPT.to_string(),
            timeout_secs: 120,
            retries: 3,
            parameters: None,
        }
    }
}

impl VisionSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let parameters = std::env::var("ALIYUN_VISION_PARAMETERS")
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .filter(|v| v.is_object());
        Self {
            api_key: resolve_api_key(API_KEY_ENVS),
            endpoint: env_or("ALIYUN_VISION_ENDPOINT", &defaults.endpoint),
            model: env_or("ALIYUN_VISION_MODEL", &defaults.model),
            prompt: env_or("ALIYUN_VISION_PROMPT", &defaults.prompt),
            timeout_secs: env_parsed("ALIYUN_VISION_TIMEOUT", defaults.timeout_secs),
            retries: env_parsed("ALIYUN_VISION_RETRIES", defaults.retries),
            parameters,
        }
    }
}

/// Probe the given environment entries in order; first non-empty wins.
pub fn resolve_api_key(env_names: &[&str]) -> Option<String> {
    for name in env_names {
        if let Ok(value) = std::env::var(name) {
            if !value.trim().is_empty() {
                debug!("api key resolved from {}", name);
                return Some(value);
            }
        }
    }
    None
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_dashscope() {
        let asr = AsrSettings::default();
        assert_eq!(asr.model, "fun-asr");
        assert_eq!(asr.retries, 3);
        assert!(asr.endpoint.contains("/services/audio/asr/"));
        assert!(asr.file_upload_endpoint.ends_with("/files"));

        let vision = VisionSettings::default();
        assert_eq!(vision.model, "qwen-vl-max");
        assert!(vision.endpoint.contains("multimodal-generation"));
    }

    #[test]
    fn api_key_resolution_takes_first_non_empty() {
        // Unique names so parallel tests cannot interfere.
        std::env::set_var("AV_SCRIBE_TEST_KEY_A", "");
        std::env::set_var("AV_SCRIBE_TEST_KEY_B", "secret-b");
        std::env::set_var("AV_SCRIBE_TEST_KEY_C", "secret-c");
        let key = resolve_api_key(&[
            "AV_SCRIBE_TEST_KEY_A",
            "AV_SCRIBE_TEST_KEY_B",
            "AV_SCRIBE_TEST_KEY_C",
        ]);
        assert_eq!(key.as_deref(), Some("secret-b"));

        let missing = resolve_api_key(&["AV_SCRIBE_TEST_KEY_NONE"]);
        assert!(missing.is_none());
    }
}
