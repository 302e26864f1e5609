//! Backend identity and per-backend request policy.
//!
//! The proxy distinguishes three classes of Chat Completions servers by base
//! URL substring: a cloud aggregator (OpenRouter), the direct OpenAI endpoint,
//! and a local inference daemon. Everything else is treated generically and
//! relies on the adaptive capability detection alone.

use std::fmt;
use std::time::Duration;

use serde_json::json;

use crate::apis::openai::ChatCompletionsRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Cloud aggregator (`openrouter.ai`): supports reasoning blocks and
    /// streamed usage accounting, wants attribution headers.
    Aggregator,
    /// Direct OpenAI endpoint (`api.openai.com`).
    Direct,
    /// Local inference daemon on loopback. No auth, slower timeouts.
    Local,
    Unknown,
}

impl Backend {
    pub fn from_base_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();
        if lower.contains("openrouter.ai") {
            Backend::Aggregator
        } else if lower.contains("api.openai.com") {
            Backend::Direct
        } else if lower.contains("localhost") || lower.contains("127.0.0.1") {
            Backend::Local
        } else {
            Backend::Unknown
        }
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self, Backend::Local)
    }

    pub fn requires_auth(&self) -> bool {
        !self.is_loopback()
    }

    pub fn supports_reasoning(&self) -> bool {
        matches!(self, Backend::Aggregator | Backend::Direct)
    }

    /// End-to-end timeout for non-streaming calls. Local models are given
    /// longer to cold-start.
    pub fn request_timeout(&self) -> Duration {
        match self {
            Backend::Local => Duration::from_secs(180),
            _ => Duration::from_secs(90),
        }
    }

    /// End-to-end timeout for streaming calls.
    pub fn stream_timeout(&self) -> Duration {
        match self {
            Backend::Local => Duration::from_secs(600),
            _ => Duration::from_secs(300),
        }
    }

    /// Apply the backend's streaming request dialect. Called only for
    /// `stream=true` requests.
    pub fn augment_streaming_request(&self, req: &mut ChatCompletionsRequest) {
        match self {
            Backend::Aggregator => {
                // Usage accounting and reasoning blocks are both opt-in here.
                req.stream_options = Some(json!({"include_usage": true}));
                req.usage = Some(json!({"include": true}));
                req.reasoning = Some(json!({"enabled": true}));
            }
            Backend::Direct => {
                req.stream_options = Some(json!({"include_usage": true}));
                req.reasoning_effort = Some("medium".to_string());
            }
            Backend::Local => {
                // Local models tend to ignore tools unless forced.
                let has_tools = req.tools.as_ref().is_some_and(|t| !t.is_empty());
                if has_tools && req.tool_choice.is_none() {
                    req.tool_choice = Some(json!("required"));
                }
            }
            Backend::Unknown => {}
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Aggregator => write!(f, "aggregator"),
            Backend::Direct => write!(f, "direct"),
            Backend::Local => write!(f, "local"),
            Backend::Unknown => write!(f, "unknown"),
        }
    }
}
