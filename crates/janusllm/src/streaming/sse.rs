//! Input-side SSE line classification for the Chat Completions convention:
//! `data: <json>` payload lines, comment lines, and the `data: [DONE]`
//! terminator.

/// What one input line means to the stream translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Blank line, comment, or anything else that carries no payload.
    Skip,
    /// The `[DONE]` terminator.
    Done,
    /// A `data:` line with its JSON payload.
    Data(&'a str),
}

pub fn classify_line(line: &str) -> SseLine<'_> {
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with(':') {
        return SseLine::Skip;
    }
    if trimmed.contains("[DONE]") {
        return SseLine::Done;
    }
    if let Some(payload) = trimmed.strip_prefix("data: ") {
        return SseLine::Data(payload);
    }

    SseLine::Skip
}
