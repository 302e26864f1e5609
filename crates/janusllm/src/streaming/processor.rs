//! The SSE-to-SSE streaming state machine: consumes a Chat Completions event
//! stream line by line and produces the equivalent Anthropic Messages event
//! sequence in real time.
//!
//! The processor is a buffer in the feed-then-drain style: the caller pushes
//! each input line with [`MessagesStreamProcessor::process_line`] and drains
//! the accumulated output bytes after every push, so each complete event can
//! be flushed to the client immediately.

use std::collections::{BTreeMap, HashSet};

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::apis::anthropic::{
    ContentBlock, ContentDelta, MessageDeltaBody, MessagesRole, MessagesStopReason,
    MessagesStreamEvent, MessagesUsage, StreamMessage,
};
use crate::apis::openai::{DeltaContent, StreamChunk, StreamDelta, ToolCallDelta, Usage};
use crate::error::ProxyError;
use crate::generate_tool_use_id;
use crate::sanitize::sanitize_tool_args;
use crate::streaming::sse::{classify_line, SseLine};
use crate::transforms::map_finish_reason;
use crate::TOOL_CALL_PLACEHOLDER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    /// The `[DONE]` terminator arrived; feed no more lines and call `finish`.
    Done,
}

/// Per-tool-call accumulation state, keyed by the delta `index` that
/// identifies one call across chunks. Arguments buffer unconditionally:
/// some models send them before the id and name ever appear.
#[derive(Debug, Default)]
struct ToolCallState {
    id: Option<String>,
    name: Option<String>,
    args_buffer: String,
    claude_index: Option<usize>,
    started: bool,
}

pub struct MessagesStreamProcessor {
    message_id: String,
    model: String,

    next_index: usize,
    text_index: Option<usize>,
    thinking_index: Option<usize>,
    thinking_has_content: bool,

    tool_calls: BTreeMap<usize, ToolCallState>,
    /// Tool-use ids already emitted. Backends occasionally send the same call
    /// both as a native block and as an OpenAI tool_call delta.
    processed_tool_ids: HashSet<String>,

    final_stop_reason: MessagesStopReason,
    usage: MessagesUsage,

    out: Vec<u8>,
    finished: bool,
}

impl MessagesStreamProcessor {
    pub fn new(model: impl Into<String>) -> Self {
        MessagesStreamProcessor {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            model: model.into(),
            next_index: 0,
            text_index: None,
            thinking_index: None,
            thinking_has_content: false,
            tool_calls: BTreeMap::new(),
            processed_tool_ids: HashSet::new(),
            final_stop_reason: MessagesStopReason::EndTurn,
            usage: MessagesUsage::default(),
            out: Vec::new(),
            finished: false,
        }
    }

    /// Emit `message_start` and the conventional `ping`.
    pub fn begin(&mut self) {
        let event = MessagesStreamEvent::MessageStart {
            message: StreamMessage {
                id: self.message_id.clone(),
                kind: "message".to_string(),
                role: MessagesRole::Assistant,
                content: vec![],
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: MessagesUsage::default(),
            },
        };
        self.write_event(&event);
        self.write_event(&MessagesStreamEvent::Ping);
    }

    /// Drain everything produced since the last drain. The caller should
    /// flush the returned bytes to the client before feeding the next line.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    /// Feed one line of the upstream SSE body.
    pub fn process_line(&mut self, line: &str) -> LineOutcome {
        let payload = match classify_line(line) {
            SseLine::Skip => return LineOutcome::Continue,
            SseLine::Done => return LineOutcome::Done,
            SseLine::Data(payload) => payload,
        };

        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(_) => {
                tracing::debug!("skipping unparseable stream chunk");
                return LineOutcome::Continue;
            }
        };

        // A top-level `type` means the backend is already speaking Anthropic
        // SSE; forward the original payload verbatim.
        if let Some(kind) = value.get("type").and_then(Value::as_str) {
            let frame = format!("event: {kind}\ndata: {payload}\n\n");
            self.out.extend_from_slice(frame.as_bytes());
            return LineOutcome::Continue;
        }

        let chunk: StreamChunk = match serde_json::from_value(value) {
            Ok(chunk) => chunk,
            Err(_) => return LineOutcome::Continue,
        };

        if let Some(usage) = &chunk.usage {
            self.update_usage(usage);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return LineOutcome::Continue;
        };

        // Some backends stream under `message` instead of `delta`.
        let Some(delta) = choice.delta.or(choice.message) else {
            return LineOutcome::Continue;
        };

        self.handle_delta(delta);

        if let Some(finish_reason) = choice.finish_reason.as_deref().filter(|r| !r.is_empty()) {
            // Remember only; usage often arrives in a later chunk, so the
            // stream keeps processing until [DONE].
            self.final_stop_reason = map_finish_reason(finish_reason);
        }

        LineOutcome::Continue
    }

    /// Close every open block and emit the terminal events. Safe to call
    /// after `[DONE]`, upstream EOF, or a read error; runs once.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let text_index_at_finish = self.text_index;
        if let Some(index) = text_index_at_finish {
            self.write_event(&MessagesStreamEvent::ContentBlockStop { index });
        }

        // Late arrivals: calls that got a name but never started (id and name
        // only at the end of the stream) open retroactively now.
        let keys: Vec<usize> = self.tool_calls.keys().copied().collect();
        for key in keys.iter().copied() {
            self.start_tool_call_if_ready(key);
        }

        // If the late starts had to open the placeholder text block, it is
        // still open; close it before the tool blocks finalize.
        if self.text_index != text_index_at_finish {
            if let Some(index) = self.text_index {
                self.write_event(&MessagesStreamEvent::ContentBlockStop { index });
            }
        }

        for key in keys {
            self.finalize_tool_call(key);
        }

        if self.thinking_has_content {
            if let Some(index) = self.thinking_index {
                self.write_event(&MessagesStreamEvent::ContentBlockStop { index });
            }
        }

        self.write_event(&MessagesStreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: self.final_stop_reason,
                stop_sequence: None,
            },
            usage: self.usage,
        });
        self.write_event(&MessagesStreamEvent::MessageStop);
    }

    /// Emit an inline error event; headers are long gone once streaming has
    /// begun, so this is the only way failures can reach the client.
    pub fn emit_error(&mut self, error: &ProxyError) {
        self.write_event(&MessagesStreamEvent::Error {
            error: json!({
                "type": error.kind.wire_name(),
                "message": error.message,
            }),
        });
    }

    // -- delta dispatch -----------------------------------------------------

    fn handle_delta(&mut self, delta: StreamDelta) {
        // Reasoning arrives in three dialects, in priority order:
        // reasoning_content (o-series), reasoning_details (aggregators,
        // only when the plain field is absent), and plain reasoning.
        if let Some(text) = delta.reasoning_content.as_deref().filter(|t| !t.is_empty()) {
            self.send_thinking(text.to_string());
        }

        if delta.reasoning.is_none() {
            if let Some(details) = &delta.reasoning_details {
                for detail in details {
                    if let Some(text) = detail.thinking_text() {
                        self.send_thinking(text.to_string());
                    }
                }
            }
        }

        if let Some(text) = delta.reasoning.as_deref().filter(|t| !t.is_empty()) {
            self.send_thinking(text.to_string());
        }

        match delta.content {
            Some(DeltaContent::Text(text)) => {
                if !text.is_empty() {
                    self.send_text(text);
                }
            }
            Some(DeltaContent::Blocks(blocks)) => {
                for block in blocks {
                    self.handle_native_block(block);
                }
            }
            _ => {}
        }

        if let Some(tool_calls) = delta.tool_calls {
            for (position, call) in tool_calls.into_iter().enumerate() {
                self.handle_tool_call_delta(position, call);
            }
        }
    }

    fn handle_native_block(&mut self, block: Value) {
        match serde_json::from_value::<ContentBlock>(block) {
            Ok(ContentBlock::Text { text }) if !text.is_empty() => self.send_text(text),
            Ok(ContentBlock::Thinking { thinking, .. }) if !thinking.is_empty() => {
                self.send_thinking(thinking)
            }
            Ok(ContentBlock::ToolUse { id, name, input }) => {
                self.handle_native_tool_use(id, name, input)
            }
            _ => {}
        }
    }

    /// A complete tool call delivered as a native Anthropic block inside
    /// `delta.content`.
    fn handle_native_tool_use(&mut self, id: String, name: String, input: Value) {
        let id = if id.is_empty() {
            generate_tool_use_id(None)
        } else {
            id
        };

        if !self.processed_tool_ids.insert(id.clone()) {
            tracing::debug!(%id, "skipping already-processed tool call");
            return;
        }

        let args_buffer = if input.is_null() {
            "{}".to_string()
        } else {
            serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string())
        };

        self.ensure_placeholder_block();
        let index = self.alloc_index();

        // Find a free slot; delta-indexed calls may already occupy the low keys.
        let mut key = self.tool_calls.len();
        while self.tool_calls.contains_key(&key) {
            key += 1;
        }
        self.tool_calls.insert(
            key,
            ToolCallState {
                id: Some(id.clone()),
                name: Some(name.clone()),
                args_buffer,
                claude_index: Some(index),
                started: true,
            },
        );

        self.write_event(&MessagesStreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::ToolUse {
                id,
                name,
                input: Value::Object(Map::new()),
            },
        });
    }

    fn handle_tool_call_delta(&mut self, position: usize, call: ToolCallDelta) {
        let key = call.index.unwrap_or(position);
        self.tool_calls.entry(key).or_default();

        if let Some(id) = call.id.filter(|id| !id.is_empty()) {
            if self.processed_tool_ids.contains(&id) {
                tracing::debug!(%id, "skipping already-processed tool call delta");
                return;
            }
            self.tool_calls.get_mut(&key).unwrap().id = Some(id);
        }

        let Some(function) = call.function else {
            return;
        };

        if let Some(name) = function.name.filter(|n| !n.is_empty()) {
            self.tool_calls.get_mut(&key).unwrap().name = Some(name);
        }

        if !self.start_tool_call_if_ready(key) {
            return;
        }

        // Arguments accumulate regardless of whether the block has started;
        // buffering is never gated on metadata having arrived.
        if let Some(arguments) = function.arguments {
            let state = self.tool_calls.get_mut(&key).unwrap();
            match arguments {
                Value::String(fragment) => {
                    if !fragment.is_empty() {
                        state.args_buffer.push_str(&fragment);
                    }
                }
                Value::Null => {}
                // Whole-object arguments replace the buffer outright.
                other => {
                    state.args_buffer =
                        serde_json::to_string(&other).unwrap_or_else(|_| "{}".to_string());
                }
            }
        }
    }

    /// Open the content block for a tool call whose name is known. Returns
    /// false when the call turned out to be a duplicate that must be dropped.
    fn start_tool_call_if_ready(&mut self, key: usize) -> bool {
        let ready = {
            let state = &self.tool_calls[&key];
            state.name.is_some() && !state.started
        };
        if !ready {
            return true;
        }

        let id = match self.tool_calls[&key].id.clone() {
            Some(id) => id,
            None => {
                let id = generate_tool_use_id(Some(key));
                self.tool_calls.get_mut(&key).unwrap().id = Some(id.clone());
                id
            }
        };

        if !self.processed_tool_ids.insert(id.clone()) {
            tracing::debug!(%id, "skipping already-processed tool call at start");
            return false;
        }

        self.ensure_placeholder_block();
        let index = self.alloc_index();

        let state = self.tool_calls.get_mut(&key).unwrap();
        state.claude_index = Some(index);
        state.started = true;
        let name = state.name.clone().unwrap_or_default();

        self.write_event(&MessagesStreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::ToolUse {
                id,
                name,
                input: Value::Object(Map::new()),
            },
        });
        true
    }

    /// Emit the single authoritative `input_json_delta` (the sanitized full
    /// argument object) and close the block.
    fn finalize_tool_call(&mut self, key: usize) {
        let (index, name, buffer) = {
            let state = &self.tool_calls[&key];
            match (state.started, state.claude_index) {
                (true, Some(index)) => (
                    index,
                    state.name.clone().unwrap_or_default(),
                    state.args_buffer.clone(),
                ),
                _ => return,
            }
        };

        let partial_json = if buffer.is_empty() {
            "{}".to_string()
        } else {
            match serde_json::from_str::<Value>(&buffer) {
                Ok(Value::Object(map)) => {
                    Value::Object(sanitize_tool_args(&name, map)).to_string()
                }
                _ => {
                    tracing::debug!(tool = %name, "tool arguments did not parse, sending empty object");
                    "{}".to_string()
                }
            }
        };

        self.write_event(&MessagesStreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::InputJsonDelta { partial_json },
        });
        self.write_event(&MessagesStreamEvent::ContentBlockStop { index });
    }

    // -- block lifecycle ----------------------------------------------------

    fn alloc_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn send_thinking(&mut self, content: String) {
        if self.thinking_index.is_none() {
            let index = self.alloc_index();
            self.thinking_index = Some(index);
            self.write_event(&MessagesStreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::Thinking {
                    thinking: String::new(),
                    signature: Some(String::new()),
                },
            });
        }
        let index = self.thinking_index.unwrap();
        self.write_event(&MessagesStreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::ThinkingDelta { thinking: content },
        });
        self.thinking_has_content = true;
    }

    fn send_text(&mut self, content: String) {
        if self.text_index.is_none() {
            let index = self.alloc_index();
            self.text_index = Some(index);
            self.write_event(&MessagesStreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::Text {
                    text: String::new(),
                },
            });
        }
        let index = self.text_index.unwrap();
        self.write_event(&MessagesStreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta { text: content },
        });
    }

    /// Clients render "(no content)" when a tool_use block is the very first
    /// block, so a tool call with no preceding prose opens a text block with
    /// a fixed placeholder delta first.
    fn ensure_placeholder_block(&mut self) {
        if self.text_index.is_some() || self.thinking_index.is_some() {
            return;
        }
        let index = self.alloc_index();
        self.text_index = Some(index);
        self.write_event(&MessagesStreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::Text {
                text: String::new(),
            },
        });
        self.write_event(&MessagesStreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta {
                text: TOOL_CALL_PLACEHOLDER.to_string(),
            },
        });
    }

    fn update_usage(&mut self, usage: &Usage) {
        self.usage.input_tokens = usage.prompt_tokens;
        self.usage.output_tokens = usage.completion_tokens;
        self.usage.cache_read_input_tokens = usage
            .prompt_tokens_details
            .map(|details| details.cached_tokens)
            .unwrap_or(0);
    }

    fn write_event(&mut self, event: &MessagesStreamEvent) {
        self.out.extend_from_slice(event.to_sse().as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run a full fixture stream through the processor and return the output.
    fn run(model: &str, lines: &[&str]) -> String {
        let mut processor = MessagesStreamProcessor::new(model);
        processor.begin();
        for line in lines {
            if processor.process_line(line) == LineOutcome::Done {
                break;
            }
        }
        processor.finish();
        String::from_utf8(processor.take_output()).unwrap()
    }

    fn parse_events(output: &str) -> Vec<(String, Value)> {
        let mut events = Vec::new();
        let mut pending: Option<String> = None;
        for line in output.lines() {
            if let Some(name) = line.strip_prefix("event: ") {
                pending = Some(name.to_string());
            } else if let Some(data) = line.strip_prefix("data: ") {
                let name = pending.take().expect("data line without event line");
                events.push((name, serde_json::from_str(data).unwrap()));
            }
        }
        events
    }

    /// Assert the ordering invariants every stream must satisfy: one
    /// message_start and message_stop, balanced start/stop per index, deltas
    /// only inside open blocks, and indices contiguous from zero in order of
    /// first use.
    fn assert_stream_invariants(events: &[(String, Value)]) {
        assert_eq!(events.iter().filter(|(n, _)| n == "message_start").count(), 1);
        assert_eq!(events.iter().filter(|(n, _)| n == "message_stop").count(), 1);
        assert_eq!(events.first().unwrap().0, "message_start");
        assert_eq!(events.last().unwrap().0, "message_stop");

        let mut open: HashSet<u64> = HashSet::new();
        let mut seen_order: Vec<u64> = Vec::new();
        for (name, data) in events {
            match name.as_str() {
                "content_block_start" => {
                    let index = data["index"].as_u64().unwrap();
                    assert!(open.insert(index), "double start for index {index}");
                    assert!(!seen_order.contains(&index), "index {index} reused");
                    seen_order.push(index);
                }
                "content_block_delta" => {
                    let index = data["index"].as_u64().unwrap();
                    assert!(open.contains(&index), "delta outside open block {index}");
                }
                "content_block_stop" => {
                    let index = data["index"].as_u64().unwrap();
                    assert!(open.remove(&index), "stop without start for {index}");
                }
                _ => {}
            }
        }
        assert!(open.is_empty(), "unclosed blocks: {open:?}");
        for (expected, actual) in seen_order.iter().enumerate() {
            assert_eq!(*actual as usize, expected, "indices not contiguous");
        }
    }

    #[test]
    fn test_reasoning_then_text_stream() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"reasoning":"thinking..."}}]}"#,
                r#"data: {"choices":[{"delta":{"content":"done"}}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                r#"data: {"usage":{"prompt_tokens":5,"completion_tokens":2}}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        assert_stream_invariants(&events);

        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "ping",
                "content_block_start", // thinking, index 0
                "content_block_delta",
                "content_block_start", // text, index 1
                "content_block_delta",
                "content_block_stop", // text first
                "content_block_stop", // thinking second
                "message_delta",
                "message_stop",
            ]
        );

        assert_eq!(events[2].1["content_block"]["type"], "thinking");
        assert_eq!(events[2].1["content_block"]["signature"], "");
        assert_eq!(events[2].1["index"], 0);
        assert_eq!(events[3].1["delta"]["thinking"], "thinking...");
        assert_eq!(events[4].1["content_block"]["type"], "text");
        assert_eq!(events[4].1["index"], 1);
        assert_eq!(events[5].1["delta"]["text"], "done");
        assert_eq!(events[6].1["index"], 1);
        assert_eq!(events[7].1["index"], 0);

        let (_, message_delta) = events.iter().find(|(n, _)| n == "message_delta").unwrap();
        assert_eq!(message_delta["delta"]["stop_reason"], "end_turn");
        assert_eq!(message_delta["usage"]["input_tokens"], 5);
        assert_eq!(message_delta["usage"]["output_tokens"], 2);
    }

    #[test]
    fn test_split_tool_arguments_reassembled() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"tc_1","function":{"name":"Edit"}}]}}]}"#,
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"file_pa"}}]}}]}"#,
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"/a\",\"old_string\":\"x\",\"new_string\":\"y\"}"}}]}}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        assert_stream_invariants(&events);

        // Placeholder text block precedes the tool block.
        let starts: Vec<&Value> = events
            .iter()
            .filter(|(n, _)| n == "content_block_start")
            .map(|(_, d)| d)
            .collect();
        assert_eq!(starts[0]["content_block"]["type"], "text");
        assert_eq!(starts[1]["content_block"]["type"], "tool_use");
        assert_eq!(starts[1]["content_block"]["id"], "tc_1");
        assert_eq!(starts[1]["content_block"]["name"], "Edit");
        assert!(output.contains(TOOL_CALL_PLACEHOLDER));

        // Exactly one input_json_delta, carrying the fully reassembled args.
        let json_deltas: Vec<&Value> = events
            .iter()
            .filter(|(n, d)| n == "content_block_delta" && d["delta"]["type"] == "input_json_delta")
            .map(|(_, d)| d)
            .collect();
        assert_eq!(json_deltas.len(), 1);
        let args: Value =
            serde_json::from_str(json_deltas[0]["delta"]["partial_json"].as_str().unwrap())
                .unwrap();
        assert_eq!(
            args,
            json!({"file_path": "/a", "old_string": "x", "new_string": "y"})
        );

        let (_, message_delta) = events.iter().find(|(n, _)| n == "message_delta").unwrap();
        assert_eq!(message_delta["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn test_query_argument_repaired_in_stream() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"t1","function":{"name":"Bash","arguments":"{\"query\":\"ls -la\"}"}}]}}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        assert_stream_invariants(&events);

        let (_, delta) = events
            .iter()
            .find(|(n, d)| n == "content_block_delta" && d["delta"]["type"] == "input_json_delta")
            .unwrap();
        let args: Value =
            serde_json::from_str(delta["delta"]["partial_json"].as_str().unwrap()).unwrap();
        assert_eq!(args, json!({"command": "ls -la"}));
    }

    #[test]
    fn test_late_tool_metadata_starts_retroactively() {
        // Arguments first; id and name only in the last chunk.
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"command\":\"ls\"}"}}]}}]}"#,
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"late_1","function":{"name":"Bash"}}]}}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        assert_stream_invariants(&events);

        let (_, start) = events
            .iter()
            .find(|(n, d)| n == "content_block_start" && d["content_block"]["type"] == "tool_use")
            .unwrap();
        assert_eq!(start["content_block"]["id"], "late_1");
        assert_eq!(start["content_block"]["name"], "Bash");

        let (_, delta) = events
            .iter()
            .find(|(n, d)| n == "content_block_delta" && d["delta"]["type"] == "input_json_delta")
            .unwrap();
        let args: Value =
            serde_json::from_str(delta["delta"]["partial_json"].as_str().unwrap()).unwrap();
        assert_eq!(args, json!({"command": "ls"}));
    }

    #[test]
    fn test_name_only_at_eof_without_done() {
        // No [DONE] at all; finish() must still retroactively open and close.
        let mut processor = MessagesStreamProcessor::new("m");
        processor.begin();
        processor.process_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"file_path\":\"/x\"}"}}]}}]}"#,
        );
        processor.process_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"Read"}}]}}]}"#,
        );
        processor.finish();
        let output = String::from_utf8(processor.take_output()).unwrap();
        let events = parse_events(&output);
        assert_stream_invariants(&events);

        let (_, start) = events
            .iter()
            .find(|(n, d)| n == "content_block_start" && d["content_block"]["type"] == "tool_use")
            .unwrap();
        assert!(start["content_block"]["id"].as_str().unwrap().starts_with("toolu_"));
    }

    #[test]
    fn test_duplicate_native_and_delta_tool_call() {
        let output = run(
            "gpt-x",
            &[
                // Same call arrives both as a native block and a tool_calls delta.
                r#"data: {"choices":[{"delta":{"content":[{"type":"tool_use","id":"dup_1","name":"Bash","input":{"command":"ls"}}]}}]}"#,
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"dup_1","function":{"name":"Bash","arguments":"{\"command\":\"ls\"}"}}]}}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        assert_stream_invariants(&events);

        let tool_starts: Vec<&Value> = events
            .iter()
            .filter(|(n, d)| n == "content_block_start" && d["content_block"]["type"] == "tool_use")
            .map(|(_, d)| d)
            .collect();
        assert_eq!(tool_starts.len(), 1);
        assert_eq!(tool_starts[0]["content_block"]["id"], "dup_1");
    }

    #[test]
    fn test_passthrough_native_anthropic_chunks() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
                "data: [DONE]",
            ],
        );
        // Forwarded verbatim under its own event name.
        assert!(output.contains(
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n"
        ));
    }

    #[test]
    fn test_malformed_and_comment_lines_skipped() {
        let output = run(
            "gpt-x",
            &[
                "",
                ": keep-alive",
                "data: {not json",
                r#"data: {"choices":[{"delta":{"content":"ok"}}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        assert_stream_invariants(&events);
        assert!(output.contains(r#""text":"ok""#));
    }

    #[test]
    fn test_usage_from_details_and_later_chunks() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"content":"x"},"finish_reason":"stop"}]}"#,
                // Usage arrives after finish_reason, with cached-token detail.
                r#"data: {"usage":{"prompt_tokens":100,"completion_tokens":7,"prompt_tokens_details":{"cached_tokens":64}}}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        let (_, message_delta) = events.iter().find(|(n, _)| n == "message_delta").unwrap();
        assert_eq!(message_delta["usage"]["input_tokens"], 100);
        assert_eq!(message_delta["usage"]["output_tokens"], 7);
        assert_eq!(message_delta["usage"]["cache_read_input_tokens"], 64);
    }

    #[test]
    fn test_reasoning_details_skipped_when_reasoning_present() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"reasoning":"real","reasoning_details":[{"type":"reasoning.text","text":"SHOULD_NOT_APPEAR"}]}}]}"#,
                "data: [DONE]",
            ],
        );
        assert!(output.contains(r#""thinking":"real""#));
        assert!(!output.contains("SHOULD_NOT_APPEAR"));
    }

    #[test]
    fn test_reasoning_content_dialect() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"reasoning_content":"deep"}}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        assert_stream_invariants(&events);
        assert!(output.contains(r#""thinking":"deep""#));
    }

    #[test]
    fn test_message_field_instead_of_delta() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"message":{"content":"from message"}}]}"#,
                "data: [DONE]",
            ],
        );
        assert!(output.contains(r#""text":"from message""#));
    }

    #[test]
    fn test_empty_args_finalize_as_empty_object() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"t1","function":{"name":"Bash"}}]}}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        let (_, delta) = events
            .iter()
            .find(|(n, d)| n == "content_block_delta" && d["delta"]["type"] == "input_json_delta")
            .unwrap();
        assert_eq!(delta["delta"]["partial_json"], "{}");
    }

    #[test]
    fn test_unparseable_args_finalize_as_empty_object() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"t1","function":{"name":"Bash","arguments":"{\"cmd\": nope"}}]}}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        let (_, delta) = events
            .iter()
            .find(|(n, d)| n == "content_block_delta" && d["delta"]["type"] == "input_json_delta")
            .unwrap();
        assert_eq!(delta["delta"]["partial_json"], "{}");
    }

    #[test]
    fn test_object_valued_arguments() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"t1","function":{"name":"Read","arguments":{"file_path":"/a"}}}]}}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        let (_, delta) = events
            .iter()
            .find(|(n, d)| n == "content_block_delta" && d["delta"]["type"] == "input_json_delta")
            .unwrap();
        let args: Value =
            serde_json::from_str(delta["delta"]["partial_json"].as_str().unwrap()).unwrap();
        assert_eq!(args, json!({"file_path": "/a"}));
    }

    #[test]
    fn test_two_parallel_tool_calls_get_distinct_indices() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"tool_calls":[
                    {"index":0,"id":"a","function":{"name":"Bash","arguments":"{\"command\":\"ls\"}"}},
                    {"index":1,"id":"b","function":{"name":"Read","arguments":"{\"file_path\":\"/a\"}"}}
                ]}}]}"#,
                "data: [DONE]",
            ],
        );
        let events = parse_events(&output);
        assert_stream_invariants(&events);

        let tool_starts: Vec<&Value> = events
            .iter()
            .filter(|(n, d)| n == "content_block_start" && d["content_block"]["type"] == "tool_use")
            .map(|(_, d)| d)
            .collect();
        assert_eq!(tool_starts.len(), 2);
        assert_ne!(tool_starts[0]["index"], tool_starts[1]["index"]);
        assert_eq!(tool_starts[0]["content_block"]["id"], "a");
        assert_eq!(tool_starts[1]["content_block"]["id"], "b");
    }

    #[test]
    fn test_no_placeholder_when_text_already_open() {
        let output = run(
            "gpt-x",
            &[
                r#"data: {"choices":[{"delta":{"content":"let me check"}}]}"#,
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"t1","function":{"name":"Bash","arguments":"{}"}}]}}]}"#,
                "data: [DONE]",
            ],
        );
        assert!(!output.contains(TOOL_CALL_PLACEHOLDER));
        let events = parse_events(&output);
        assert_stream_invariants(&events);
    }

    #[test]
    fn test_error_event_shape() {
        let mut processor = MessagesStreamProcessor::new("m");
        processor.emit_error(&ProxyError::stream_processing("stream read error"));
        let output = String::from_utf8(processor.take_output()).unwrap();
        assert!(output.starts_with("event: error\ndata: "));
        assert!(output.contains(r#""type":"stream_processing_error""#));
        assert!(output.contains("stream read error"));
    }

    #[test]
    fn test_message_start_shape() {
        let mut processor = MessagesStreamProcessor::new("backend-model");
        processor.begin();
        let output = String::from_utf8(processor.take_output()).unwrap();
        let events = parse_events(&output);
        assert_eq!(events[0].0, "message_start");
        let message = &events[0].1["message"];
        assert!(message["id"].as_str().unwrap().starts_with("msg_"));
        assert_eq!(message["type"], "message");
        assert_eq!(message["role"], "assistant");
        assert_eq!(message["model"], "backend-model");
        assert_eq!(message["content"], json!([]));
        assert!(message["stop_reason"].is_null());
        assert_eq!(message["usage"]["input_tokens"], 0);
        assert_eq!(events[1].0, "ping");
    }
}
