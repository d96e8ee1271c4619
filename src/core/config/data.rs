use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::store::DEFAULT_STREAMING_MARKER;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Keys accepted by `chatdeck set` / `chatdeck unset`.
pub const CONFIG_KEYS: &[&str] = &[
    "backend-url",
    "request-timeout-secs",
    "log-level",
    "streaming-marker",
];

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the chat backend proxy
    pub backend_url: Option<String>,
    /// Connect timeout for backend requests, in seconds
    pub request_timeout_secs: Option<u64>,
    /// Tracing filter used when RUST_LOG is not set (e.g. "info", "chatdeck=debug")
    pub log_level: Option<String>,
    /// Appended to a response while it is still streaming
    pub streaming_marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigKeyError {
    UnknownKey(String),
    InvalidValue { key: String, reason: String },
}

impl fmt::Display for ConfigKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigKeyError::UnknownKey(key) => write!(
                f,
                "Unknown config key '{key}'. Available keys: {}",
                CONFIG_KEYS.join(", ")
            ),
            ConfigKeyError::InvalidValue { key, reason } => {
                write!(f, "Invalid value for '{key}': {reason}")
            }
        }
    }
}

impl Error for ConfigKeyError {}

fn canonical_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('_', "-")
}

impl Config {
    pub fn backend_url(&self) -> &str {
        self.backend_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_BACKEND_URL)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn streaming_marker(&self) -> &str {
        self.streaming_marker
            .as_deref()
            .unwrap_or(DEFAULT_STREAMING_MARKER)
    }

    pub fn set_key(&mut self, key: &str, value: &str) -> Result<(), ConfigKeyError> {
        let key = canonical_key(key);
        match key.as_str() {
            "backend-url" => {
                let trimmed = value.trim();
                if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
                    return Err(ConfigKeyError::InvalidValue {
                        key,
                        reason: "expected an http:// or https:// URL".into(),
                    });
                }
                self.backend_url = Some(trimmed.to_string());
            }
            "request-timeout-secs" => {
                let secs = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|err| ConfigKeyError::InvalidValue {
                        key: key.clone(),
                        reason: err.to_string(),
                    })?;
                self.request_timeout_secs = Some(secs);
            }
            "log-level" => self.log_level = Some(value.trim().to_string()),
            "streaming-marker" => self.streaming_marker = Some(value.to_string()),
            _ => return Err(ConfigKeyError::UnknownKey(key)),
        }
        Ok(())
    }

    pub fn unset_key(&mut self, key: &str) -> Result<(), ConfigKeyError> {
        match canonical_key(key).as_str() {
            "backend-url" => self.backend_url = None,
            "request-timeout-secs" => self.request_timeout_secs = None,
            "log-level" => self.log_level = None,
            "streaming-marker" => self.streaming_marker = None,
            other => return Err(ConfigKeyError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
