use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_VISION_MODEL: &str = "llava";
const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_UPLOAD_MB: usize = 50;

/// Process-wide settings read from `FIGURE_EXTRACT_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind: String,
    /// Base URL of an Ollama server. Verification is fail-open without one.
    pub ollama_url: Option<String>,
    pub vision_model: String,
    pub verify_timeout: Duration,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            ollama_url: None,
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            verify_timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str, default| parse_or(key, text(key), default);

        Self {
            bind: text("FIGURE_EXTRACT_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            ollama_url: text("FIGURE_EXTRACT_OLLAMA_URL"),
            vision_model: text("FIGURE_EXTRACT_VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            verify_timeout: Duration::from_secs(number(
                "FIGURE_EXTRACT_VERIFY_TIMEOUT_SECS",
                DEFAULT_VERIFY_TIMEOUT_SECS,
            )),
            request_timeout: Duration::from_secs(number(
                "FIGURE_EXTRACT_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            max_upload_bytes: parse_or(
                "FIGURE_EXTRACT_MAX_UPLOAD_MB",
                text("FIGURE_EXTRACT_MAX_UPLOAD_MB"),
                DEFAULT_MAX_UPLOAD_MB,
            ) * 1024
                * 1024,
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            warn!(key, value = %raw, "Ignoring invalid setting, using default");
            default
        }
    }
}
