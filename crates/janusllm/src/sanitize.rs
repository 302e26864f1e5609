//! Repair of malformed tool arguments.
//!
//! Models driven through Chat Completions gateways routinely hallucinate a
//! `query` parameter instead of the schema's real parameter names, or smuggle
//! the real arguments as a JSON string inside `query`. These functions strip
//! the bogus key and rebuild a plausible argument object for the tool family,
//! matched by case-insensitive substring so wrapped names like
//! `mcp__fs__Edit` still hit.

use serde_json::{Map, Value};

/// Tool families with a known repair strategy. Matching order matters:
/// `todo` and `notebook` are checked before `write`/`read`/`edit` so compound
/// names like `TodoWrite` and `NotebookEdit` land on their own family.
fn match_family(tool_name_lower: &str) -> Option<Family> {
    if tool_name_lower.contains("todo") {
        Some(Family::Todo)
    } else if tool_name_lower.contains("notebook") {
        Some(Family::Notebook)
    } else if tool_name_lower.contains("askuserquestion") {
        Some(Family::AskUserQuestion)
    } else if tool_name_lower.contains("edit") {
        Some(Family::Edit)
    } else if tool_name_lower.contains("grep") {
        Some(Family::Grep)
    } else if tool_name_lower.contains("bash") {
        Some(Family::Bash)
    } else if tool_name_lower.contains("read") {
        Some(Family::Read)
    } else if tool_name_lower.contains("write") {
        Some(Family::Write)
    } else if tool_name_lower.contains("glob") {
        Some(Family::Glob)
    } else if tool_name_lower.contains("lsp") {
        Some(Family::Lsp)
    } else if tool_name_lower.contains("task") {
        Some(Family::Task)
    } else if tool_name_lower.contains("webfetch") || tool_name_lower.contains("fetch") {
        Some(Family::WebFetch)
    } else if tool_name_lower.contains("websearch") || tool_name_lower.contains("search") {
        Some(Family::WebSearch)
    } else if tool_name_lower.contains("skill") {
        Some(Family::Skill)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Edit,
    Grep,
    Bash,
    Read,
    Write,
    Glob,
    Lsp,
    Task,
    Todo,
    WebFetch,
    WebSearch,
    Skill,
    AskUserQuestion,
    Notebook,
}

/// Whether `input` already carries the minimum required parameters for the
/// tool family. Families without a known requirement always pass.
pub fn has_required_params(tool_name: &str, input: &Map<String, Value>) -> bool {
    let lower = tool_name.to_lowercase();
    match match_family(&lower) {
        Some(Family::Edit) => {
            input.contains_key("file_path")
                && input.contains_key("old_string")
                && input.contains_key("new_string")
        }
        Some(Family::Bash) => input.contains_key("command"),
        Some(Family::Read) => input.contains_key("file_path"),
        Some(Family::Grep) => input.contains_key("pattern"),
        Some(Family::Glob) => input.contains_key("pattern"),
        Some(Family::Write) => input.contains_key("file_path") && input.contains_key("content"),
        _ => true,
    }
}

/// Sanitize an already-parsed argument object.
///
/// Every key spelled `query` (case-insensitively) is removed. A string-valued
/// query is remembered and spread into the family's required parameters; an
/// object-valued query is merged in without overwriting. Only WebSearch gets
/// its `query` back.
pub fn sanitize_tool_args(tool_name: &str, mut input: Map<String, Value>) -> Map<String, Value> {
    let lower = tool_name.to_lowercase();

    let query_keys: Vec<String> = input
        .keys()
        .filter(|k| k.to_lowercase() == "query")
        .cloned()
        .collect();

    let mut query_text = String::new();
    for key in query_keys {
        match input.remove(&key) {
            Some(Value::String(s)) => query_text = s,
            Some(Value::Object(nested)) => {
                for (k, v) in nested {
                    input.entry(k).or_insert(v);
                }
            }
            _ => {}
        }
    }

    if query_text.is_empty() {
        return input;
    }

    // The query may itself be a JSON-encoded argument object.
    if query_text.trim_start().starts_with('{') {
        if let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(&query_text) {
            for (k, v) in parsed {
                input.entry(k).or_insert(v);
            }
            if has_required_params(tool_name, &input) {
                return input;
            }
        }
    }

    let fill = |input: &mut Map<String, Value>, key: &str, value: Value| {
        if !input.contains_key(key) {
            input.insert(key.to_string(), value);
        }
    };

    match match_family(&lower) {
        Some(Family::Edit) => {
            fill(&mut input, "file_path", Value::String(query_text.clone()));
            fill(&mut input, "old_string", Value::String(query_text.clone()));
            fill(&mut input, "new_string", Value::String(query_text));
        }
        Some(Family::Grep) => {
            fill(&mut input, "pattern", Value::String(query_text));
            fill(&mut input, "path", Value::String(".".to_string()));
        }
        Some(Family::Bash) => fill(&mut input, "command", Value::String(query_text)),
        Some(Family::Read) => fill(&mut input, "file_path", Value::String(query_text)),
        Some(Family::Write) => {
            fill(&mut input, "file_path", Value::String(query_text.clone()));
            fill(&mut input, "content", Value::String(query_text));
        }
        Some(Family::Glob) => fill(&mut input, "pattern", Value::String(query_text)),
        Some(Family::Lsp) => fill(&mut input, "filePath", Value::String(query_text)),
        Some(Family::Task) => fill(&mut input, "prompt", Value::String(query_text)),
        Some(Family::Todo) => {
            if query_text.trim_start().starts_with('[') {
                if let Ok(parsed) = serde_json::from_str::<Value>(&query_text) {
                    fill(&mut input, "todos", parsed);
                }
            }
        }
        Some(Family::WebFetch) => fill(&mut input, "url", Value::String(query_text)),
        Some(Family::WebSearch) => {
            // The one tool whose schema really does take `query`.
            input.insert("query".to_string(), Value::String(query_text));
        }
        Some(Family::Skill) => fill(&mut input, "skill", Value::String(query_text)),
        Some(Family::AskUserQuestion) => {
            if query_text.trim_start().starts_with('[') {
                if let Ok(parsed) = serde_json::from_str::<Value>(&query_text) {
                    fill(&mut input, "questions", parsed);
                }
            }
        }
        Some(Family::Notebook) => fill(&mut input, "notebook_path", Value::String(query_text)),
        None => {}
    }

    input
}

/// Sanitize a JSON-encoded argument string (the `function.arguments` wire
/// form). Empty, whitespace-only, `{}` and `null` inputs all become an empty
/// object so tool dispatch never sees a bare string where an object belongs.
/// Unparseable text is passed through untouched for the client to surface.
pub fn sanitize_tool_input(tool_name: &str, args_json: &str) -> Value {
    let trimmed = args_json.trim();
    if trimmed.is_empty() || trimmed == "{}" {
        return Value::Object(Map::new());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Value::Object(sanitize_tool_args(tool_name, map)),
        Ok(Value::Null) => Value::Object(Map::new()),
        Ok(other) => other,
        Err(_) => Value::String(args_json.to_string()),
    }
}

/// Sanitize a tool input that arrived as an arbitrary JSON value (the native
/// Anthropic `tool_use.input` shape).
pub fn sanitize_tool_input_value(tool_name: &str, input: Value) -> Value {
    match input {
        Value::Null => Value::Object(Map::new()),
        Value::Object(map) => Value::Object(sanitize_tool_args(tool_name, map)),
        Value::String(s) => sanitize_tool_input(tool_name, &s),
        other => other,
    }
}
