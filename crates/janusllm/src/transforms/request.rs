//! Anthropic Messages request → Chat Completions request.

use serde_json::Value;

use crate::apis::anthropic::{
    ContentBlock, MessageContent, MessagesRequest, MessagesRole, MessagesTool,
};
use crate::apis::openai::{
    ChatCompletionsRequest, ChatMessage, ChatTool, FunctionCall, FunctionDef, Role, ToolCall,
};
use crate::backend::Backend;
use crate::capability::CapabilityCache;
use crate::error::ProxyError;
use crate::router::{route_model, ModelOverrides};
use crate::{generate_tool_use_id, TOOL_PARAMETER_INSTRUCTION};

/// Everything the request transcoder needs to know about where the request is
/// going: the backend identity for dialect augmentation, the base URL and
/// capability cache for token-limit selection, and the tier overrides for
/// model routing.
pub struct TranslateContext<'a> {
    pub backend: Backend,
    pub base_url: &'a str,
    pub overrides: &'a ModelOverrides,
    pub capabilities: &'a CapabilityCache,
}

impl From<MessagesRole> for Role {
    fn from(role: MessagesRole) -> Self {
        match role {
            MessagesRole::User => Role::User,
            MessagesRole::Assistant => Role::Assistant,
            MessagesRole::System => Role::System,
        }
    }
}

/// Convert an Anthropic request into the Chat Completions request that will
/// actually be sent. Malformed tool inputs are tolerated here; the sanitizer
/// repairs whatever comes back from the model.
pub fn convert_request(
    req: &MessagesRequest,
    ctx: &TranslateContext,
) -> Result<ChatCompletionsRequest, ProxyError> {
    let model = route_model(&req.model, ctx.overrides);

    let mut messages: Vec<ChatMessage> = Vec::new();

    let system_text = req
        .system
        .as_ref()
        .map(|s| s.extract_text())
        .unwrap_or_default();
    if !system_text.is_empty() {
        messages.push(ChatMessage::text(Role::System, system_text));
    }

    for message in &req.messages {
        flatten_message(message, &mut messages);
    }

    let tools = req.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
        tools.iter().map(convert_tool).collect::<Vec<_>>()
    });

    inject_tool_instruction(&mut messages);

    let mut out = ChatCompletionsRequest {
        model,
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        tools,
        ..Default::default()
    };

    // Exactly one token-limit parameter, chosen per learned (base_url, model)
    // capability. Optimistic first contact sends max_completion_tokens.
    if req.max_tokens > 0 {
        if ctx
            .capabilities
            .uses_max_completion_tokens(ctx.base_url, &out.model)
        {
            out.max_completion_tokens = Some(req.max_tokens);
        } else {
            out.max_tokens = Some(req.max_tokens);
        }
    }

    if let Some(stop) = req.stop_sequences.as_ref().filter(|s| !s.is_empty()) {
        out.stop = Some(stop.clone());
    }

    if req.is_streaming() {
        ctx.backend.augment_streaming_request(&mut out);
    }

    Ok(out)
}

/// Flatten one Anthropic message into zero or more Chat Completions messages.
///
/// A block list containing any `tool_result` fans out into one role=tool
/// message per result and suppresses the ordinary message for that iteration;
/// otherwise text blocks collapse into one content string and `tool_use`
/// blocks ride along as `tool_calls`.
fn flatten_message(message: &crate::apis::anthropic::MessagesMessage, out: &mut Vec<ChatMessage>) {
    match &message.content {
        MessageContent::Text(text) => {
            out.push(ChatMessage::text(message.role.into(), text.clone()));
        }
        MessageContent::Blocks(blocks) => {
            let has_tool_result = blocks
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolResult { .. }));

            let mut text_parts: Vec<&str> = Vec::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();

            for block in blocks {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text),
                    ContentBlock::ToolUse { id, name, input } => {
                        let id = if id.is_empty() {
                            generate_tool_use_id(Some(tool_calls.len()))
                        } else {
                            id.clone()
                        };
                        let arguments = if input.is_null() {
                            "{}".to_string()
                        } else {
                            serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
                        };
                        tool_calls.push(ToolCall {
                            id,
                            kind: "function".to_string(),
                            function: FunctionCall {
                                name: name.clone(),
                                arguments,
                            },
                        });
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        let text = content
                            .as_ref()
                            .map(|c| c.extract_text())
                            .unwrap_or_default();
                        out.push(ChatMessage {
                            role: Role::Tool,
                            content: Some(Value::String(text)),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                            reasoning_details: None,
                        });
                    }
                    // Thinking blocks and unknown types do not travel upstream.
                    _ => {}
                }
            }

            if !has_tool_result && (!text_parts.is_empty() || !tool_calls.is_empty()) {
                out.push(ChatMessage {
                    role: message.role.into(),
                    content: Some(Value::String(text_parts.join("\n"))),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                    reasoning_details: None,
                });
            }
        }
        // Unrecognized content shapes are forwarded untouched.
        MessageContent::Other(value) => {
            out.push(ChatMessage {
                role: message.role.into(),
                content: Some(value.clone()),
                tool_calls: None,
                tool_call_id: None,
                reasoning_details: None,
            });
        }
    }
}

fn convert_tool(tool: &MessagesTool) -> ChatTool {
    ChatTool {
        kind: "function".to_string(),
        function: FunctionDef {
            name: tool.name.clone(),
            description: enhance_tool_description(
                &tool.name,
                tool.description.as_deref().unwrap_or_default(),
            ),
            parameters: tool.input_schema.clone(),
        },
    }
}

/// Append a bilingual required-parameter hint to the tool description.
/// Substring-matched so MCP-wrapped names (`mcp__fs__Edit`) still hit;
/// `todo`/`notebook` are matched first for the same reason as the sanitizer.
fn enhance_tool_description(tool_name: &str, description: &str) -> String {
    let lower = tool_name.to_lowercase();

    let hint = if lower.contains("todo") {
        "\n\n[REQUIRED PARAM] todos - The array of todo items. DO NOT use 'query'.\n【必需参数】todos（待办事项数组）。禁止使用 query。"
    } else if lower.contains("notebook") {
        "\n\n[REQUIRED PARAM] notebook_path - The absolute notebook path. DO NOT use 'query'.\n【必需参数】notebook_path（笔记本绝对路径）。禁止使用 query。"
    } else if lower.contains("askuserquestion") {
        "\n\n[REQUIRED PARAM] questions - The array of questions to ask. DO NOT use 'query'.\n【必需参数】questions（问题数组）。禁止使用 query。"
    } else if lower.contains("edit") {
        "\n\n[REQUIRED PARAMS] file_path, old_string, new_string - ALL THREE are required with DIFFERENT values. DO NOT use 'query'.\n【必需参数】file_path, old_string, new_string（三个都必需，值必须不同）。禁止使用 query。"
    } else if lower.contains("bash") {
        "\n\n[REQUIRED PARAM] command - The shell command to execute. DO NOT use 'query'.\n【必需参数】command（要执行的命令）。禁止使用 query。"
    } else if lower.contains("read") {
        "\n\n[REQUIRED PARAM] file_path - The absolute path to read. DO NOT use 'query'.\n【必需参数】file_path（绝对路径）。禁止使用 query。"
    } else if lower.contains("write") {
        "\n\n[REQUIRED PARAMS] file_path, content - BOTH required. DO NOT use 'query'.\n【必需参数】file_path, content（两个都必需）。禁止使用 query。"
    } else if lower.contains("grep") {
        "\n\n[REQUIRED PARAM] pattern - The regex pattern to search. DO NOT use 'query'.\n【必需参数】pattern（正则表达式）。禁止使用 query。"
    } else if lower.contains("glob") {
        "\n\n[REQUIRED PARAM] pattern - The glob pattern to match. DO NOT use 'query'.\n【必需参数】pattern（glob 模式）。禁止使用 query。"
    } else if lower.contains("lsp") {
        "\n\n[REQUIRED PARAMS] operation, filePath, line, character - ALL required. DO NOT use 'query'.\n【必需参数】operation, filePath, line, character（全部必需）。禁止使用 query。"
    } else if lower.contains("task") {
        "\n\n[REQUIRED PARAMS] description, prompt, subagent_type - ALL required. DO NOT use 'query'.\n【必需参数】description, prompt, subagent_type（全部必需）。禁止使用 query。"
    } else if lower.contains("webfetch") || lower.contains("fetch") {
        "\n\n[REQUIRED PARAMS] url, prompt - BOTH required. DO NOT use 'query'.\n【必需参数】url, prompt（两个都必需）。禁止使用 query。"
    } else if lower.contains("websearch") || lower.contains("search") {
        // The one tool whose schema really does use query.
        "\n\n[REQUIRED PARAM] query - The search query string.\n【必需参数】query（搜索查询字符串）。"
    } else if lower.contains("skill") {
        "\n\n[REQUIRED PARAM] skill - The skill name to invoke. DO NOT use 'query'.\n【必需参数】skill（技能名称）。禁止使用 query。"
    } else {
        ""
    };

    format!("{description}{hint}")
}

/// Prepend (or append to an existing system message) the fixed instruction
/// that forbids the hallucinated `query` parameter.
fn inject_tool_instruction(messages: &mut Vec<ChatMessage>) {
    if messages.is_empty() {
        return;
    }

    if messages[0].role == Role::System {
        let existing = messages[0]
            .content
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default();
        messages[0].content = Some(Value::String(format!(
            "{existing}{TOOL_PARAMETER_INSTRUCTION}"
        )));
    } else {
        messages.insert(0, ChatMessage::text(Role::System, TOOL_PARAMETER_INSTRUCTION));
    }
}
