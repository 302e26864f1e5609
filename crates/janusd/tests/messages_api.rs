//! End-to-end tests: a real janusd listener in front of a mock Chat
//! Completions backend, driven with a plain HTTP client.

use std::net::SocketAddr;
use std::sync::Arc;

use janusd::config::ProxyConfig;
use janusd::server::{serve, AppState};
use serde_json::{json, Value};
use tokio::net::TcpListener;

fn config_for(backend_url: &str, shared_secret: Option<&str>) -> ProxyConfig {
    let backend_url = backend_url.to_string();
    let secret = shared_secret.map(str::to_string);
    ProxyConfig::from_vars(move |name| match name {
        "OPENAI_API_KEY" => Some("sk-test".to_string()),
        "OPENAI_BASE_URL" => Some(backend_url.clone()),
        "ANTHROPIC_API_KEY" => secret.clone(),
        _ => None,
    })
    .unwrap()
}

async fn spawn_proxy(config: ProxyConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::new(AppState::new(config))));
    addr
}

#[tokio::test]
async fn test_simple_text_round_trip() {
    let mut backend = mockito::Server::new_async().await;
    let mock = backend
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1}}"#,
        )
        .create_async()
        .await;

    let addr = spawn_proxy(config_for(&backend.url(), None)).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet-x",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    mock.assert_async().await;

    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["model"], "claude-sonnet-x");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "hello");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["input_tokens"], 3);
    assert_eq!(body["usage"]["output_tokens"], 1);
}

#[tokio::test]
async fn test_tool_call_with_query_repair() {
    let mut backend = mockito::Server::new_async().await;
    backend
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"id":"chatcmpl-2","choices":[{"index":0,"message":{"role":"assistant","content":null,"tool_calls":[{"id":"toolu_1","type":"function","function":{"name":"Bash","arguments":"{\"query\":\"ls -la\"}"}}]},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":10,"completion_tokens":4}}"#,
        )
        .create_async()
        .await;

    let addr = spawn_proxy(config_for(&backend.url(), None)).await;
    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet-x",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "list files"}],
            "tools": [{"name": "Bash", "description": "run a command",
                       "input_schema": {"type": "object"}}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["stop_reason"], "tool_use");
    let tool_use = &body["content"][0];
    assert_eq!(tool_use["type"], "tool_use");
    assert_eq!(tool_use["id"], "toolu_1");
    assert_eq!(tool_use["name"], "Bash");
    assert_eq!(tool_use["input"], json!({"command": "ls -la"}));
}

#[tokio::test]
async fn test_streaming_reasoning_and_text() {
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"reasoning\":\"thinking...\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"done\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );

    let mut backend = mockito::Server::new_async().await;
    backend
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse_body)
        .create_async()
        .await;

    let addr = spawn_proxy(config_for(&backend.url(), None)).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet-x",
            "max_tokens": 16,
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let text = resp.text().await.unwrap();
    let ordered = [
        "event: message_start",
        "event: ping",
        "\"type\":\"thinking\"",
        "\"thinking\":\"thinking...\"",
        "\"type\":\"text\"",
        "\"text\":\"done\"",
        "event: message_delta",
        "\"input_tokens\":5",
        "event: message_stop",
    ];
    let mut cursor = 0;
    for needle in ordered {
        let found = text[cursor..]
            .find(needle)
            .unwrap_or_else(|| panic!("missing or out of order: {needle}\n---\n{text}"));
        cursor += found;
    }
}

#[tokio::test]
async fn test_inbound_auth() {
    let backend = mockito::Server::new_async().await;
    let addr = spawn_proxy(config_for(&backend.url(), Some("secret"))).await;
    let client = reqwest::Client::new();

    let request_body = json!({
        "model": "claude-sonnet-x",
        "max_tokens": 16,
        "messages": [{"role": "user", "content": "hi"}]
    });

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .header("x-api-key", "wrong")
        .json(&request_body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "authentication_error");

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&request_body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_invalid_body_is_anthropic_shaped_400() {
    let backend = mockito::Server::new_async().await;
    let addr = spawn_proxy(config_for(&backend.url(), None)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request body"));
}

#[tokio::test]
async fn test_count_tokens_stub_and_diagnostics() {
    let backend = mockito::Server::new_async().await;
    let addr = spawn_proxy(config_for(&backend.url(), None)).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("http://{addr}/v1/messages/count_tokens"))
        .json(&json!({"model": "claude-sonnet-x", "messages": []}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"input_tokens": 100}));

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let info: Value = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["status"], "running");
    assert_eq!(info["config"]["routing_mode"], "pattern-based");

    let missing = client
        .get(format!("http://{addr}/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_upstream_error_is_anthropic_shaped() {
    let mut backend = mockito::Server::new_async().await;
    backend
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body(r#"{"error":{"message":"slow down","type":"rate_limit_exceeded"}}"#)
        .create_async()
        .await;

    let addr = spawn_proxy(config_for(&backend.url(), None)).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet-x",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 429);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["message"], "slow down");
}

#[tokio::test]
async fn test_adaptive_retry_learns_max_tokens() {
    let mut backend = mockito::Server::new_async().await;

    // Declared first: serves any body without max_completion_tokens (the
    // retry and the follow-up request).
    let accept_mock = backend
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"id":"chatcmpl-3","choices":[{"index":0,"message":{"role":"assistant","content":"ok"},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":1}}"#,
        )
        .expect(2)
        .create_async()
        .await;

    // Declared second so it takes precedence whenever the probe parameter is
    // present.
    let reject_mock = backend
        .mock("POST", "/chat/completions")
        .match_body(mockito::Matcher::Regex("max_completion_tokens".to_string()))
        .with_status(400)
        .with_body(
            r#"{"error":{"message":"Unsupported parameter: 'max_completion_tokens'","type":"invalid_request_error"}}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let addr = spawn_proxy(config_for(&backend.url(), None)).await;
    let client = reqwest::Client::new();
    let request_body = json!({
        "model": "gpt-test",
        "max_tokens": 128,
        "messages": [{"role": "user", "content": "hi"}]
    });

    // First request: probe rejected, retried without token params, succeeds.
    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&request_body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Second request: the cache now says max_tokens, so the probe mock must
    // not fire again.
    let resp = client
        .post(format!("http://{addr}/v1/messages"))
        .json(&request_body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    reject_mock.assert_async().await;
    accept_mock.assert_async().await;
}
