//! Environment-driven configuration. Variable names are frozen for
//! compatibility with existing deployments; see the README of any
//! `claude`-compatible proxy wrapper for the expected set.

use std::env;

use janusllm::{Backend, ModelOverrides};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is required unless OPENAI_BASE_URL points at a local backend")]
    MissingApiKey,
    #[error("PORT is not a valid port number: {0}")]
    InvalidPort(String),
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    /// Optional shared secret; when set, inbound `x-api-key` must match.
    pub anthropic_api_key: Option<String>,
    pub overrides: ModelOverrides,
    pub host: String,
    pub port: u16,
    pub openrouter_app_name: Option<String>,
    pub openrouter_app_url: Option<String>,
    pub passthrough_mode: bool,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source; `from_env` wires in the
    /// process environment.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| var(name).filter(|v| !v.is_empty());

        let openai_base_url = non_empty("OPENAI_BASE_URL")
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let backend = Backend::from_base_url(&openai_base_url);
        let openai_api_key = match non_empty("OPENAI_API_KEY") {
            Some(key) => key,
            // Local daemons take any token; a placeholder keeps the client
            // constructors happy without demanding a real secret.
            None if backend.is_loopback() => "ollama".to_string(),
            None => return Err(ConfigError::MissingApiKey),
        };

        let port_raw = non_empty("PORT").unwrap_or_else(|| "8082".to_string());
        let port: u16 = port_raw
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port_raw.clone()))?;

        Ok(ProxyConfig {
            openai_api_key,
            openai_base_url,
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            overrides: ModelOverrides {
                opus: non_empty("ANTHROPIC_DEFAULT_OPUS_MODEL"),
                sonnet: non_empty("ANTHROPIC_DEFAULT_SONNET_MODEL"),
                haiku: non_empty("ANTHROPIC_DEFAULT_HAIKU_MODEL"),
            },
            host: non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            openrouter_app_name: non_empty("OPENROUTER_APP_NAME"),
            openrouter_app_url: non_empty("OPENROUTER_APP_URL"),
            passthrough_mode: non_empty("PASSTHROUGH_MODE")
                .map(|v| matches!(v.as_str(), "true" | "1" | "yes"))
                .unwrap_or(false),
        })
    }

    pub fn backend(&self) -> Backend {
        Backend::from_base_url(&self.openai_base_url)
    }

    pub fn routing_mode(&self) -> &'static str {
        if self.overrides.any_set() {
            "custom (environment overrides)"
        } else {
            "pattern-based"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::from_vars(vars(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8082);
        assert!(config.anthropic_api_key.is_none());
        assert!(!config.passthrough_mode);
        assert_eq!(config.backend(), Backend::Direct);
        assert_eq!(config.routing_mode(), "pattern-based");
    }

    #[test]
    fn test_api_key_required_for_remote_backends() {
        let err = ProxyConfig::from_vars(vars(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn test_loopback_backend_waives_api_key() {
        let config = ProxyConfig::from_vars(vars(&[(
            "OPENAI_BASE_URL",
            "http://localhost:11434/v1",
        )]))
        .unwrap();
        assert_eq!(config.openai_api_key, "ollama");
        assert_eq!(config.backend(), Backend::Local);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let err = ProxyConfig::from_vars(vars(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(_)));
    }

    #[test]
    fn test_overrides_and_routing_mode() {
        let config = ProxyConfig::from_vars(vars(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_DEFAULT_SONNET_MODEL", "openai/gpt-5"),
            ("PASSTHROUGH_MODE", "1"),
        ]))
        .unwrap();
        assert_eq!(config.overrides.sonnet.as_deref(), Some("openai/gpt-5"));
        assert_eq!(config.routing_mode(), "custom (environment overrides)");
        assert!(config.passthrough_mode);
    }
}
