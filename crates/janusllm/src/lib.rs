//! janusllm: translation between the Anthropic Messages wire protocol and
//! OpenAI-compatible Chat Completions backends.
//!
//! The library carries the full bidirectional transcoder: request conversion
//! (including tool definitions and the malformed-argument sanitizer), the
//! non-streaming response rebuild, and the SSE-to-SSE streaming state machine.
//! HTTP plumbing lives in the `janusd` binary crate.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod apis;
pub mod backend;
pub mod capability;
pub mod error;
pub mod router;
pub mod sanitize;
pub mod streaming;
pub mod transforms;

pub use backend::Backend;
pub use capability::{is_token_limit_error, CapabilityCache};
pub use error::{ErrorKind, ProxyError};
pub use router::ModelOverrides;
pub use streaming::MessagesStreamProcessor;
pub use transforms::{convert_request, convert_response, TranslateContext};

/// Ingress path for Anthropic Messages requests.
pub const MESSAGES_PATH: &str = "/v1/messages";

/// Ingress path for the token-count compatibility stub.
pub const COUNT_TOKENS_PATH: &str = "/v1/messages/count_tokens";

/// Egress path appended to the configured backend base URL.
pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

pub const TOOL_ID_PREFIX: &str = "toolu_";

/// Text delta written into the placeholder text block that precedes a tool-use
/// block when the model produced no prose first. Downstream clients render
/// "(no content)" errors without it, so the literal is observable protocol
/// behavior and must not change.
pub const TOOL_CALL_PLACEHOLDER: &str = "正在调用工具：";

/// Instruction appended to (or prepended as) the system message of every
/// converted request. Models reached through Chat Completions gateways
/// habitually invent a `query` parameter for tools that do not have one; this
/// text enumerates the real required parameters. The wording is part of the
/// proxy's observable behavior and is kept verbatim.
pub const TOOL_PARAMETER_INSTRUCTION: &str = r#"

[CRITICAL TOOL PARAMETER REQUIREMENTS - READ CAREFULLY]

When using tools, you MUST use the EXACT parameter names defined in each tool's schema. The parameter "query" DOES NOT EXIST in any tool.

REQUIRED PARAMETERS FOR EACH TOOL:
- Edit: file_path, old_string, new_string (ALL THREE are required)
- Read: file_path (required)
- Write: file_path, content (BOTH required)
- Bash: command (required)
- Grep: pattern (required)
- Glob: pattern (required)
- LSP: operation, filePath, line, character (ALL required)
- Task: description, prompt, subagent_type (ALL required)
- WebFetch: url, prompt (BOTH required)

⚠️ NEVER use "query" as a parameter name - it will cause tool execution to FAIL.
⚠️ Always check the tool schema before calling any tool.

【关键工具参数要求 - 必须仔细阅读】

使用工具时，必须使用每个工具 schema 中定义的确切参数名称。任何工具都不存在 "query" 参数。

各工具必需参数：
- Edit: file_path, old_string, new_string（三个都必需，且必须是不同的值）
- Read: file_path（必需）
- Write: file_path, content（两个都必需）
- Bash: command（必需，不是 query）
- Grep: pattern（必需，不是 query）
- Glob: pattern（必需，不是 query）
- LSP: operation, filePath, line, character（全部必需）
- Task: description, prompt, subagent_type（全部必需）
- WebFetch: url, prompt（两个都必需）

⚠️ 绝对不要使用 "query" 作为参数名称 - 这会导致工具执行失败。
⚠️ 调用工具前务必检查工具的 schema。"#;

/// Synthesize a tool-use id in the frozen `toolu_<nanoseconds>[_<index>]`
/// wire format. The index suffix disambiguates ids generated within one
/// timestamp (e.g. several tool calls in one chunk).
pub fn generate_tool_use_id(index: Option<usize>) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    match index {
        Some(i) => format!("{TOOL_ID_PREFIX}{nanos}_{i}"),
        None => format!("{TOOL_ID_PREFIX}{nanos}"),
    }
}
