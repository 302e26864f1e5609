//! Model routing: map a requested Anthropic model name onto the backend model
//! that should serve it.

/// Fallback models per tier when no override is configured.
pub const DEFAULT_OPUS_MODEL: &str = "google/gemini-3-pro-preview";
pub const DEFAULT_SONNET_MODEL: &str = "google/gemini-3-flash-preview";
pub const DEFAULT_HAIKU_MODEL: &str = "google/gemini-2.5-flash";

/// Per-tier overrides, populated from the `ANTHROPIC_DEFAULT_*_MODEL`
/// environment variables.
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    pub opus: Option<String>,
    pub sonnet: Option<String>,
    pub haiku: Option<String>,
}

impl ModelOverrides {
    pub fn any_set(&self) -> bool {
        self.opus.is_some() || self.sonnet.is_some() || self.haiku.is_some()
    }
}

/// Route a requested model name to a backend model id.
///
/// Case-insensitive substring match, haiku before sonnet before opus. Names
/// that match no tier (already-native backend ids) pass through unchanged.
/// No validation of the returned id is performed.
pub fn route_model(requested: &str, overrides: &ModelOverrides) -> String {
    let lower = requested.to_lowercase();

    if lower.contains("haiku") {
        return overrides
            .haiku
            .clone()
            .unwrap_or_else(|| DEFAULT_HAIKU_MODEL.to_string());
    }
    if lower.contains("sonnet") {
        return overrides
            .sonnet
            .clone()
            .unwrap_or_else(|| DEFAULT_SONNET_MODEL.to_string());
    }
    if lower.contains("opus") {
        return overrides
            .opus
            .clone()
            .unwrap_or_else(|| DEFAULT_OPUS_MODEL.to_string());
    }

    requested.to_string()
}
