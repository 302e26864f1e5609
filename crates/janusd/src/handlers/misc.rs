//! Diagnostics and compatibility stubs: `/health`, `/`, and the token-count
//! endpoint.

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Response, StatusCode};
use janusllm::router::{DEFAULT_HAIKU_MODEL, DEFAULT_OPUS_MODEL, DEFAULT_SONNET_MODEL};
use serde_json::json;

use crate::config::ProxyConfig;
use crate::handlers::json_response;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn health() -> Response<BoxBody<Bytes, hyper::Error>> {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "version": VERSION,
        }),
    )
}

pub fn root_info(config: &ProxyConfig) -> Response<BoxBody<Bytes, hyper::Error>> {
    let tier = |override_value: &Option<String>, default: &str| match override_value {
        Some(model) => model.clone(),
        None => format!("{default} (pattern-based)"),
    };

    json_response(
        StatusCode::OK,
        &json!({
            "message": "janusd",
            "version": VERSION,
            "status": "running",
            "config": {
                "openai_base_url": config.openai_base_url,
                "routing_mode": config.routing_mode(),
                "opus_model": tier(&config.overrides.opus, DEFAULT_OPUS_MODEL),
                "sonnet_model": tier(&config.overrides.sonnet, DEFAULT_SONNET_MODEL),
                "haiku_model": tier(&config.overrides.haiku, DEFAULT_HAIKU_MODEL),
            },
            "endpoints": {
                "health": "/health",
                "messages": "/v1/messages",
                "count_tokens": "/v1/messages/count_tokens",
            },
        }),
    )
}

/// Compatibility stub, not an estimator: clients only need a well-formed
/// answer here.
pub fn count_tokens() -> Response<BoxBody<Bytes, hyper::Error>> {
    json_response(StatusCode::OK, &json!({"input_tokens": 100}))
}
