//! Wire types for OpenAI-compatible Chat Completions backends, including the
//! loose delta shapes real gateways emit while streaming (reasoning fields,
//! string-or-object tool arguments, content that is a string or a native
//! Anthropic block array).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A Chat Completions message, used on both the request and response side.
/// `content` stays a raw [`Value`]: it is a string for ordinary messages, null
/// for pure tool-call turns, and some gateways return a native Anthropic block
/// array here.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<Value>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
    pub reasoning_details: Option<Vec<ReasoningDetail>>,
}

impl ChatMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: Some(Value::String(content.into())),
            tool_calls: None,
            tool_call_id: None,
            reasoning_details: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Outbound Chat Completions request. At most one of `max_tokens` and
/// `max_completion_tokens` is ever set; which one is chosen adaptively per
/// `(base_url, model)`. The `stream_options`/`usage`/`reasoning` knobs are
/// backend dialect extensions.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChatCompletionsRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub max_completion_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop: Option<Vec<String>>,
    pub stream: Option<bool>,
    pub stream_options: Option<Value>,
    pub usage: Option<Value>,
    pub reasoning: Option<Value>,
    pub reasoning_effort: Option<String>,
    pub tools: Option<Vec<ChatTool>>,
    pub tool_choice: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChatCompletionsResponse {
    #[serde(default)]
    pub id: String,
    pub object: Option<String>,
    pub created: Option<i64>,
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

impl ChatCompletionsResponse {
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

// ---------------------------------------------------------------------------
// Streaming chunk shapes
// ---------------------------------------------------------------------------

/// One `reasoning_details` entry. Only `reasoning.text` and
/// `reasoning.summary` carry renderable text; `reasoning.encrypted` is opaque
/// ciphertext and yields nothing.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ReasoningDetail {
    #[serde(rename = "reasoning.text")]
    Text {
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(rename = "reasoning.summary")]
    Summary {
        #[serde(default)]
        summary: Option<String>,
    },
    #[serde(rename = "reasoning.encrypted")]
    Encrypted {
        #[serde(default)]
        data: Option<String>,
    },
    #[serde(untagged)]
    Other(Value),
}

impl ReasoningDetail {
    pub fn thinking_text(&self) -> Option<&str> {
        match self {
            ReasoningDetail::Text { text } => text.as_deref().filter(|t| !t.is_empty()),
            ReasoningDetail::Summary { summary } => summary.as_deref().filter(|s| !s.is_empty()),
            ReasoningDetail::Encrypted { .. } | ReasoningDetail::Other(_) => None,
        }
    }
}

/// Delta content: a plain text fragment, or a native Anthropic block array
/// that some pass-through gateways emit under Chat Completions framing.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum DeltaContent {
    Text(String),
    Blocks(Vec<Value>),
    Other(Value),
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FunctionCallDelta {
    pub name: Option<String>,
    /// Usually a string fragment; reasoning-tuned models sometimes send the
    /// whole argument object at once.
    pub arguments: Option<Value>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: Option<usize>,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub function: Option<FunctionCallDelta>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StreamDelta {
    pub role: Option<Role>,
    pub content: Option<DeltaContent>,
    pub reasoning: Option<String>,
    pub reasoning_content: Option<String>,
    pub reasoning_details: Option<Vec<ReasoningDetail>>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: u32,
    pub delta: Option<StreamDelta>,
    /// Some backends put streamed data under `message` instead of `delta`.
    pub message: Option<StreamDelta>,
    pub finish_reason: Option<String>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    pub usage: Option<Usage>,
}
