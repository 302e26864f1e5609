//! Adaptive per-model capability knowledge.
//!
//! Which token-limit parameter a backend accepts is learned at runtime: the
//! first request for a `(base_url, model)` pair optimistically sends
//! `max_completion_tokens`; a parameter-rejection error triggers one retry
//! with both fields cleared and records the answer here. The cache is
//! process-resident only and rebuilt on restart.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityKey {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelCapability {
    pub uses_max_completion_tokens: bool,
    pub last_checked: SystemTime,
}

/// Process-wide capability map. Readers do not contend with each other; the
/// only writers are the retry path and the post-success recorder.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    entries: RwLock<HashMap<CapabilityKey, ModelCapability>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, base_url: &str, model: &str) -> Option<ModelCapability> {
        let key = CapabilityKey {
            base_url: base_url.to_string(),
            model: model.to_string(),
        };
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(&key).copied())
    }

    /// Answer whether requests for this `(base_url, model)` should carry
    /// `max_completion_tokens`. Cache misses answer `true`: newer
    /// reasoning-capable models take the new parameter, and the retry path
    /// corrects the optimism exactly once.
    pub fn uses_max_completion_tokens(&self, base_url: &str, model: &str) -> bool {
        match self.lookup(base_url, model) {
            Some(capability) => {
                tracing::debug!(
                    model,
                    uses_max_completion_tokens = capability.uses_max_completion_tokens,
                    "capability cache hit"
                );
                capability.uses_max_completion_tokens
            }
            None => {
                tracing::debug!(model, "capability cache miss, trying max_completion_tokens");
                true
            }
        }
    }

    pub fn record(&self, base_url: &str, model: &str, uses_max_completion_tokens: bool) {
        let key = CapabilityKey {
            base_url: base_url.to_string(),
            model: model.to_string(),
        };
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key,
                ModelCapability {
                    uses_max_completion_tokens,
                    last_checked: SystemTime::now(),
                },
            );
        }
    }
}

/// Whether an upstream error body indicates a rejected token-limit parameter.
///
/// Providers phrase this differently, so the check is keyword-based: a
/// parameter-problem indicator AND one of our parameter names must both
/// appear. Status codes are deliberately not consulted.
pub fn is_token_limit_error(body: &str) -> bool {
    let lower = body.to_lowercase();

    let has_param_indicator = lower.contains("parameter")
        || lower.contains("unsupported")
        || lower.contains("invalid");

    let has_our_param =
        lower.contains("max_tokens") || lower.contains("max_completion_tokens");

    has_param_indicator && has_our_param
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_defaults_to_max_completion_tokens() {
        let cache = CapabilityCache::new();
        assert!(cache.uses_max_completion_tokens("https://api.openai.com/v1", "gpt-5"));
    }

    #[test]
    fn test_recorded_value_wins() {
        let cache = CapabilityCache::new();
        cache.record("https://base", "gpt-4", false);
        assert!(!cache.uses_max_completion_tokens("https://base", "gpt-4"));

        cache.record("https://base", "gpt-4", true);
        assert!(cache.uses_max_completion_tokens("https://base", "gpt-4"));
    }

    #[test]
    fn test_key_includes_base_url() {
        let cache = CapabilityCache::new();
        cache.record("https://a", "gpt-5", false);
        // Same model name behind a different backend is a separate entry.
        assert!(!cache.uses_max_completion_tokens("https://a", "gpt-5"));
        assert!(cache.uses_max_completion_tokens("https://b", "gpt-5"));
    }

    #[test]
    fn test_last_checked_is_stamped() {
        let cache = CapabilityCache::new();
        cache.record("https://a", "m", true);
        let capability = cache.lookup("https://a", "m").unwrap();
        assert!(capability.last_checked.elapsed().unwrap().as_secs() < 5);
    }

    #[test]
    fn test_token_limit_error_detection() {
        assert!(is_token_limit_error(
            "Unsupported parameter: 'max_completion_tokens' is not supported with this model."
        ));
        assert!(is_token_limit_error(
            "{\"error\":{\"message\":\"Invalid value for max_tokens\"}}"
        ));
        assert!(is_token_limit_error("unsupported parameter max_tokens"));

        // One indicator alone is not enough.
        assert!(!is_token_limit_error("max_tokens exceeded the model limit"));
        assert!(!is_token_limit_error("invalid api key"));
        assert!(!is_token_limit_error("rate limit reached"));
    }
}
