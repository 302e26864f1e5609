//! Outbound calls to the configured Chat Completions backend, including the
//! one-shot adaptive retry that learns which token-limit parameter each
//! `(base_url, model)` pair accepts.

use std::sync::Arc;
use std::time::Duration;

use janusllm::apis::openai::{ChatCompletionsRequest, ChatCompletionsResponse};
use janusllm::{
    is_token_limit_error, Backend, CapabilityCache, ProxyError, CHAT_COMPLETIONS_PATH,
};
use tracing::{debug, warn};

use crate::config::ProxyConfig;

enum CallError {
    /// Upstream rejected our token-limit parameter; eligible for the retry.
    TokenLimitParam { status: u16, body: String },
    Other(ProxyError),
}

pub struct UpstreamClient {
    http: reqwest::Client,
    config: Arc<ProxyConfig>,
    capabilities: Arc<CapabilityCache>,
}

impl UpstreamClient {
    pub fn new(config: Arc<ProxyConfig>, capabilities: Arc<CapabilityCache>) -> Self {
        UpstreamClient {
            http: reqwest::Client::new(),
            config,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> &CapabilityCache {
        &self.capabilities
    }

    fn backend(&self) -> Backend {
        self.config.backend()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.config.openai_base_url.trim_end_matches('/'),
            CHAT_COMPLETIONS_PATH
        )
    }

    fn builder(
        &self,
        req: &ChatCompletionsRequest,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let backend = self.backend();
        let mut builder = self.http.post(self.endpoint()).timeout(timeout).json(req);

        if backend.requires_auth() {
            builder = builder.bearer_auth(&self.config.openai_api_key);
        }
        if backend == Backend::Aggregator {
            // Attribution headers buy better rate limits on the aggregator.
            if let Some(url) = &self.config.openrouter_app_url {
                builder = builder.header("HTTP-Referer", url);
            }
            if let Some(name) = &self.config.openrouter_app_name {
                builder = builder.header("X-Title", name);
            }
        }
        builder
    }

    async fn send(
        &self,
        req: &ChatCompletionsRequest,
        timeout: Duration,
    ) -> Result<reqwest::Response, CallError> {
        let response = self.builder(req, timeout).send().await.map_err(|err| {
            let proxy_err = if err.is_timeout() {
                ProxyError::timeout(format!("upstream request timed out: {err}"))
            } else {
                ProxyError::connection(format!("upstream request failed: {err}"))
            };
            CallError::Other(proxy_err.with_source(err))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_token_limit_error(&body) {
                return Err(CallError::TokenLimitParam {
                    status: status.as_u16(),
                    body,
                });
            }
            return Err(CallError::Other(ProxyError::from_openai_body(
                status.as_u16(),
                &body,
            )));
        }

        Ok(response)
    }

    /// Send with the adaptive token-limit retry. On a parameter rejection the
    /// request is re-sent exactly once with both token fields cleared, and
    /// the learned capability is cached either way.
    async fn call(
        &self,
        req: &ChatCompletionsRequest,
        timeout: Duration,
    ) -> Result<reqwest::Response, ProxyError> {
        match self.send(req, timeout).await {
            Ok(response) => {
                if req.max_completion_tokens.is_some() {
                    self.capabilities
                        .record(&self.config.openai_base_url, &req.model, true);
                    debug!(model = %req.model, "backend accepts max_completion_tokens");
                }
                Ok(response)
            }
            Err(CallError::TokenLimitParam { status, .. }) => {
                warn!(
                    model = %req.model,
                    status,
                    "token-limit parameter rejected, retrying without it"
                );
                self.capabilities
                    .record(&self.config.openai_base_url, &req.model, false);

                let mut retry = req.clone();
                retry.max_tokens = None;
                retry.max_completion_tokens = None;

                match self.send(&retry, timeout).await {
                    Ok(response) => Ok(response),
                    Err(CallError::TokenLimitParam { status, body }) => {
                        Err(ProxyError::from_openai_body(status, &body))
                    }
                    Err(CallError::Other(err)) => Err(err),
                }
            }
            Err(CallError::Other(err)) => Err(err),
        }
    }

    pub async fn chat_completions(
        &self,
        req: &ChatCompletionsRequest,
    ) -> Result<ChatCompletionsResponse, ProxyError> {
        let response = self.call(req, self.backend().request_timeout()).await?;
        response.json().await.map_err(|err| {
            ProxyError::conversion("failed to decode upstream response").with_source(err)
        })
    }

    /// Open a streaming response. The body is left unread; the caller pumps
    /// it through the stream processor.
    pub async fn chat_completions_stream(
        &self,
        req: &ChatCompletionsRequest,
    ) -> Result<reqwest::Response, ProxyError> {
        self.call(req, self.backend().stream_timeout()).await
    }
}
