pub mod request;
pub mod response;

pub use request::{convert_request, TranslateContext};
pub use response::convert_response;

use crate::apis::anthropic::MessagesStopReason;

/// Map a Chat Completions finish reason onto the Anthropic stop-reason
/// vocabulary. Anything unrecognized (including `content_filter`, which has
/// no exact equivalent) reads as a normal end of turn.
pub fn map_finish_reason(finish_reason: &str) -> MessagesStopReason {
    match finish_reason {
        "stop" => MessagesStopReason::EndTurn,
        "length" => MessagesStopReason::MaxTokens,
        "tool_calls" | "function_call" => MessagesStopReason::ToolUse,
        _ => MessagesStopReason::EndTurn,
    }
}
