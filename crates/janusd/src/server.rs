//! HTTP/1 ingress: accept loop, routing table, shared state.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use janusllm::{CapabilityCache, ProxyError, COUNT_TOKENS_PATH, MESSAGES_PATH};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::config::ProxyConfig;
use crate::handlers::messages::handle_messages;
use crate::handlers::{error_response, misc};
use crate::upstream::UpstreamClient;

pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub capabilities: Arc<CapabilityCache>,
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Self {
        let config = Arc::new(config);
        let capabilities = Arc::new(CapabilityCache::new());
        let upstream = UpstreamClient::new(config.clone(), capabilities.clone());
        AppState {
            config,
            capabilities,
            upstream,
        }
    }
}

pub async fn run(config: ProxyConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("proxy listening on http://{addr}");
    serve(listener, Arc::new(AppState::new(config))).await
}

/// Accept loop, split from `run` so tests can bind an ephemeral port.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "accepted connection");
                let io = TokioIo::new(stream);
                let state = state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| route(req, state.clone()));
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(error = %err, "connection closed with error");
                    }
                });
            }
        }
    }
}

async fn route(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::POST, p) if p == MESSAGES_PATH => handle_messages(req, state).await,
        (Method::POST, p) if p == COUNT_TOKENS_PATH => Ok(misc::count_tokens()),
        (Method::GET, "/health") => Ok(misc::health()),
        (Method::GET, "/") => Ok(misc::root_info(&state.config)),
        (method, path) => Ok(error_response(&ProxyError::not_found(format!(
            "no route for {method} {path}"
        )))),
    }
}
