//! Client configuration and per-call options.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OLLAMA_HOST` | `http://localhost:11434` | Base URL of the chat server |
//! | `FERROSHAPE_TIMEOUT_MS` | unset | Per-request timeout in milliseconds |

use std::env;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::prompt::OutputMode;

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_RETRIES: u32 = 3;

/// Immutable configuration shared by every call of an [`Instructor`](crate::Instructor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructorConfig {
    pub host: String,
    /// Applied to each transport call unless the call sets its own.
    pub request_timeout: Option<Duration>,
    pub default_retries: u32,
    pub default_mode: OutputMode,
}

impl Default for InstructorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            request_timeout: None,
            default_retries: DEFAULT_RETRIES,
            default_mode: OutputMode::Json,
        }
    }
}

impl InstructorConfig {
    /// Reads `OLLAMA_HOST` and `FERROSHAPE_TIMEOUT_MS`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("OLLAMA_HOST") {
            let host = host.trim();
            if !host.is_empty() {
                config.host = normalize_host(host);
            }
        }

        if let Some(timeout_ms) = env::var("FERROSHAPE_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            config.request_timeout = Some(Duration::from_millis(timeout_ms));
        }

        config
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = normalize_host(&host.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    pub fn with_default_mode(mut self, mode: OutputMode) -> Self {
        self.default_mode = mode;
        self
    }
}

/// `OLLAMA_HOST` is commonly set without a scheme (`0.0.0.0:11434`).
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Options for a single structured chat call.
///
/// Unset fields fall back to the [`InstructorConfig`] defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub model: String,
    pub retries: Option<u32>,
    pub allow_partial: bool,
    pub mode: Option<OutputMode>,
    /// Model options forwarded verbatim (temperature, seed, ...).
    pub options: Map<String, Value>,
    pub keep_alive: Option<String>,
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            retries: None,
            allow_partial: false,
            mode: None,
            options: Map::new(),
            keep_alive: None,
            timeout: None,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Return a repaired best-effort result instead of failing when the budget runs out.
    pub fn allow_partial(mut self, allow: bool) -> Self {
        self.allow_partial = allow;
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn resolved_retries(&self, config: &InstructorConfig) -> u32 {
        self.retries.unwrap_or(config.default_retries)
    }

    pub(crate) fn resolved_mode(&self, config: &InstructorConfig) -> OutputMode {
        self.mode.unwrap_or(config.default_mode)
    }

    pub(crate) fn resolved_timeout(&self, config: &InstructorConfig) -> Option<Duration> {
        self.timeout.or(config.request_timeout)
    }
}
