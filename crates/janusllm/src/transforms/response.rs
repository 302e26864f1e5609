//! Chat Completions response → Anthropic Messages response (non-streaming).

use std::collections::HashSet;

use serde_json::Value;

use crate::apis::anthropic::{ContentBlock, MessagesResponse, MessagesRole, MessagesUsage};
use crate::apis::openai::ChatCompletionsResponse;
use crate::error::ProxyError;
use crate::generate_tool_use_id;
use crate::sanitize::{sanitize_tool_input, sanitize_tool_input_value};
use crate::transforms::map_finish_reason;

/// Rebuild an Anthropic response from a Chat Completions reply.
///
/// Content-block order: reasoning details become thinking blocks first, then
/// the message content (string, or a native Anthropic block array some
/// gateways return), then any `tool_calls` that were not already present as
/// native `tool_use` blocks. The returned `model` is the name the client
/// originally asked for, not the backend model.
pub fn convert_response(
    resp: &ChatCompletionsResponse,
    requested_model: &str,
) -> Result<MessagesResponse, ProxyError> {
    let choice = resp
        .first_choice()
        .ok_or_else(|| ProxyError::conversion("no choices in upstream response"))?;

    let mut content: Vec<ContentBlock> = Vec::new();

    if let Some(details) = &choice.message.reasoning_details {
        for detail in details {
            if let Some(text) = detail.thinking_text() {
                content.push(ContentBlock::Thinking {
                    thinking: text.to_string(),
                    // Present-but-empty: marks the block as collapsible
                    // reasoning for the client.
                    signature: Some(String::new()),
                });
            }
        }
    }

    // Native tool_use blocks get remembered so the same call arriving again
    // under tool_calls is not emitted twice.
    let mut processed_tool_ids: HashSet<String> = HashSet::new();

    match &choice.message.content {
        Some(Value::String(text)) if !text.is_empty() => {
            content.push(ContentBlock::Text { text: text.clone() });
        }
        Some(Value::Array(items)) => {
            for item in items {
                match serde_json::from_value::<ContentBlock>(item.clone()) {
                    Ok(ContentBlock::Thinking { thinking, .. }) => {
                        content.push(ContentBlock::Thinking {
                            thinking,
                            signature: Some(String::new()),
                        });
                    }
                    Ok(ContentBlock::Text { text }) => {
                        content.push(ContentBlock::Text { text });
                    }
                    Ok(ContentBlock::ToolUse { id, name, input }) => {
                        let id = if id.is_empty() {
                            generate_tool_use_id(None)
                        } else {
                            id
                        };
                        processed_tool_ids.insert(id.clone());
                        let input = sanitize_tool_input_value(&name, input);
                        content.push(ContentBlock::ToolUse { id, name, input });
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    if let Some(tool_calls) = &choice.message.tool_calls {
        for call in tool_calls {
            if processed_tool_ids.contains(&call.id) {
                continue;
            }
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: sanitize_tool_input(&call.function.name, &call.function.arguments),
            });
        }
    }

    let stop_reason = choice
        .finish_reason
        .as_deref()
        .map(map_finish_reason);

    let usage = resp
        .usage
        .as_ref()
        .map(|u| MessagesUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            ..Default::default()
        })
        .unwrap_or_default();

    Ok(MessagesResponse {
        id: resp.id.clone(),
        kind: "message".to_string(),
        role: MessagesRole::Assistant,
        content,
        model: requested_model.to_string(),
        stop_reason,
        stop_sequence: None,
        usage,
    })
}
