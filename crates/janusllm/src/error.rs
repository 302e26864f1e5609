//! The proxy's error taxonomy, rendered to clients in the Anthropic error
//! shape regardless of where the failure originated.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    Api,
    Overloaded,
    Timeout,
    Connection,
    Conversion,
    StreamProcessing,
}

impl ErrorKind {
    /// The `error.type` string on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Api => "api_error",
            ErrorKind::Overloaded => "overloaded_error",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::Connection => "connection_error",
            ErrorKind::Conversion => "conversion_error",
            ErrorKind::StreamProcessing => "stream_processing_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Permission => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimit => 429,
            ErrorKind::Api => 500,
            ErrorKind::Overloaded => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::Connection => 502,
            ErrorKind::Conversion => 500,
            ErrorKind::StreamProcessing => 500,
        }
    }

    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::InvalidRequest,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Permission,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimit,
            503 => ErrorKind::Overloaded,
            504 => ErrorKind::Timeout,
            502 => ErrorKind::Connection,
            _ => ErrorKind::Api,
        }
    }
}

#[derive(Debug, Error)]
#[error("{}: {}", .kind.wire_name(), .message)]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ProxyError {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conversion, message)
    }

    pub fn stream_processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StreamProcessing, message)
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Build from an upstream HTTP status alone.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_http_status(status), message)
    }

    /// Build from an upstream non-200 response body. If the body parses as an
    /// OpenAI-style error object its `error.type` picks the kind; otherwise
    /// the status code decides and the raw body becomes the message.
    pub fn from_openai_body(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error_obj = parsed.as_ref().and_then(|v| v.get("error"));

        let message = error_obj
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());

        let kind = match error_obj
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str)
        {
            Some("invalid_request_error") => ErrorKind::InvalidRequest,
            Some("authentication_error") | Some("invalid_api_key") => ErrorKind::Authentication,
            Some("permission_denied") => ErrorKind::Permission,
            Some("not_found") => ErrorKind::NotFound,
            Some("rate_limit_exceeded") => ErrorKind::RateLimit,
            Some("server_error") | Some("internal_error") => ErrorKind::Api,
            Some("overloaded") => ErrorKind::Overloaded,
            Some(_) => ErrorKind::Api,
            None => ErrorKind::from_http_status(status),
        };

        Self::new(kind, message)
    }

    pub fn status(&self) -> u16 {
        self.kind.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RateLimit
                | ErrorKind::Overloaded
                | ErrorKind::Timeout
                | ErrorKind::Connection
        )
    }

    /// The Anthropic-shaped error body clients receive, both as a JSON reply
    /// and inside `event: error` SSE events.
    pub fn to_wire_json(&self) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": self.kind.wire_name(),
                "message": self.message,
            }
        })
    }
}
