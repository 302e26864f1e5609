//! The `/v1/messages` handler: auth, request translation, the upstream call,
//! and either a JSON reply or the live SSE translation pump.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{Request, Response, StatusCode};
use janusllm::apis::anthropic::MessagesRequest;
use janusllm::streaming::LineOutcome;
use janusllm::{
    convert_request, convert_response, MessagesStreamProcessor, ProxyError, TranslateContext,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::handlers::{error_response, json_response};
use crate::server::AppState;

pub async fn handle_messages(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if let Some(expected) = &state.config.anthropic_api_key {
        if api_key.as_deref() != Some(expected.as_str()) {
            return Ok(error_response(&ProxyError::authentication(
                "invalid x-api-key",
            )));
        }
    }

    let body = req.collect().await?.to_bytes();

    let claude_req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = %err, "failed to parse messages request");
            return Ok(error_response(&ProxyError::invalid_request(format!(
                "Invalid request body: {err}"
            ))));
        }
    };

    let ctx = TranslateContext {
        backend: state.config.backend(),
        base_url: &state.config.openai_base_url,
        overrides: &state.config.overrides,
        capabilities: &state.capabilities,
    };
    let openai_req = match convert_request(&claude_req, &ctx) {
        Ok(converted) => converted,
        Err(err) => return Ok(error_response(&err)),
    };

    debug!(
        requested = %claude_req.model,
        backend_model = %openai_req.model,
        streaming = claude_req.is_streaming(),
        "translated messages request"
    );

    if claude_req.is_streaming() {
        stream_messages(state, openai_req).await
    } else {
        respond_messages(state, claude_req, openai_req).await
    }
}

async fn respond_messages(
    state: Arc<AppState>,
    claude_req: MessagesRequest,
    openai_req: janusllm::apis::openai::ChatCompletionsRequest,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let upstream_resp = match state.upstream.chat_completions(&openai_req).await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(error = %err, "upstream call failed");
            return Ok(error_response(&err));
        }
    };

    let claude_resp = match convert_response(&upstream_resp, &claude_req.model) {
        Ok(resp) => resp,
        Err(err) => return Ok(error_response(&err)),
    };

    info!(
        model = %openai_req.model,
        input_tokens = claude_resp.usage.input_tokens,
        output_tokens = claude_resp.usage.output_tokens,
        "request complete"
    );

    match serde_json::to_value(&claude_resp) {
        Ok(body) => Ok(json_response(StatusCode::OK, &body)),
        Err(err) => Ok(error_response(
            &ProxyError::conversion("failed to serialize response").with_source(err),
        )),
    }
}

/// Open the upstream SSE stream first, so connection failures still surface
/// as a pre-header JSON error, then commit `text/event-stream` and pump lines
/// through the translator. Every completed event is flushed immediately; the
/// pump stops on its own when the client hangs up, which drops the upstream
/// body and releases the backend connection.
async fn stream_messages(
    state: Arc<AppState>,
    openai_req: janusllm::apis::openai::ChatCompletionsRequest,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let upstream_resp = match state.upstream.chat_completions_stream(&openai_req).await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(error = %err, "upstream stream open failed");
            return Ok(error_response(&err));
        }
    };

    let backend_model = openai_req.model.clone();
    let (tx, rx) = mpsc::channel::<Bytes>(16);

    tokio::spawn(async move {
        let mut processor = MessagesStreamProcessor::new(backend_model);
        processor.begin();
        if tx.send(Bytes::from(processor.take_output())).await.is_err() {
            return;
        }

        let mut byte_stream = upstream_resp.bytes_stream();
        // Line buffer; deltas can be large, so lines are bounded only by the
        // chunks the backend actually sends.
        let mut buffer: Vec<u8> = Vec::new();
        let mut read_error: Option<ProxyError> = None;
        let mut done = false;

        'read: while let Some(item) = byte_stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(error = %err, "error reading upstream stream");
                    read_error = Some(ProxyError::stream_processing(format!(
                        "stream read error: {err}"
                    )));
                    break 'read;
                }
            };

            buffer.extend_from_slice(&chunk);
            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line_bytes);
                if processor.process_line(&line) == LineOutcome::Done {
                    done = true;
                    break 'read;
                }
                let out = processor.take_output();
                if !out.is_empty() && tx.send(Bytes::from(out)).await.is_err() {
                    debug!("client disconnected mid-stream");
                    return;
                }
            }
        }

        // A final line without a trailing newline still counts.
        if !done && read_error.is_none() && !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).to_string();
            processor.process_line(&line);
        }

        processor.finish();
        if let Some(err) = read_error {
            processor.emit_error(&err);
        }
        let out = processor.take_output();
        if !out.is_empty() {
            let _ = tx.send(Bytes::from(out)).await;
        }
    });

    let body_stream =
        ReceiverStream::new(rx).map(|chunk| Ok::<_, hyper::Error>(Frame::data(chunk)));
    let stream_body = BoxBody::new(StreamBody::new(body_stream));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "text/event-stream")
        .header(hyper::header::CACHE_CONTROL, "no-cache")
        .header(hyper::header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(stream_body);

    Ok(response.unwrap_or_else(|err| {
        error_response(&ProxyError::api(format!("failed to build response: {err}")))
    }))
}
