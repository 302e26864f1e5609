//! Wire types for the Anthropic Messages API: requests, content blocks,
//! responses, and the SSE stream event vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessagesRole {
    User,
    Assistant,
    System,
}

/// System prompt: either a bare string or a list of content blocks, of which
/// only `text` blocks contribute.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SystemPrompt {
    Single(String),
    Blocks(Vec<ContentBlock>),
    Other(Value),
}

impl SystemPrompt {
    /// Flatten to the single string a Chat Completions system message wants.
    /// Non-text blocks and unrecognized shapes contribute nothing.
    pub fn extract_text(&self) -> String {
        match self {
            SystemPrompt::Single(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            SystemPrompt::Other(_) => String::new(),
        }
    }
}

/// Tool result content is either a string or a list of `text` sub-blocks.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Other(Value),
}

impl ToolResultContent {
    pub fn extract_text(&self) -> String {
        match self {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            ToolResultContent::Other(_) => String::new(),
        }
    }
}

/// One typed element of an Anthropic message.
///
/// `signature` on thinking blocks distinguishes "absent" from "empty string":
/// a present-but-empty signature is what tells the downstream client to render
/// the block as collapsible reasoning. The `Other` arm keeps block types this
/// proxy does not translate (images, documents) from failing the parse.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Option<ToolResultContent>,
        is_error: Option<bool>,
    },
    #[serde(untagged)]
    Other(Value),
}

/// Message content: a plain string or an ordered block list. Anything else is
/// carried through untouched.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Other(Value),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesMessage {
    pub role: MessagesRole,
    pub content: MessageContent,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<MessagesMessage>,
    #[serde(default)]
    pub max_tokens: u32,
    pub system: Option<SystemPrompt>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
    pub stream: Option<bool>,
    pub tools: Option<Vec<MessagesTool>>,
}

impl MessagesRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessagesStopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessagesUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// `stop_reason` and `stop_sequence` serialize as explicit nulls, the way the
/// upstream Messages API renders them.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: MessagesRole,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<MessagesStopReason>,
    pub stop_sequence: Option<String>,
    pub usage: MessagesUsage,
}

// ---------------------------------------------------------------------------
// Streaming events
// ---------------------------------------------------------------------------

/// The message object embedded in `message_start`. `stop_reason` and
/// `stop_sequence` serialize as explicit nulls there.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: MessagesRole,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<MessagesStopReason>,
    pub stop_sequence: Option<String>,
    pub usage: MessagesUsage,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageDeltaBody {
    pub stop_reason: MessagesStopReason,
    pub stop_sequence: Option<String>,
}

/// The full Anthropic streaming vocabulary. Each variant serializes with its
/// `type` tag inside the data payload and frames itself as a complete
/// `event: <name>\ndata: <json>\n\n` SSE event.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagesStreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    Ping,
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: MessagesUsage,
    },
    MessageStop,
    Error {
        error: Value,
    },
}

impl MessagesStreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MessagesStreamEvent::MessageStart { .. } => "message_start",
            MessagesStreamEvent::Ping => "ping",
            MessagesStreamEvent::ContentBlockStart { .. } => "content_block_start",
            MessagesStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            MessagesStreamEvent::ContentBlockStop { .. } => "content_block_stop",
            MessagesStreamEvent::MessageDelta { .. } => "message_delta",
            MessagesStreamEvent::MessageStop => "message_stop",
            MessagesStreamEvent::Error { .. } => "error",
        }
    }

    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_default();
        format!("event: {}\ndata: {}\n\n", self.name(), data)
    }
}
