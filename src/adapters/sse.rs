//! Incremental Server-Sent Events decoding for streaming HTTP LLM adapters.
//!
//! `reqwest`'s byte stream hands us chunks on arbitrary boundaries, so the
//! parser buffers partial lines across `push` calls and only emits an event
//! once a blank line closes it out.

/// One decoded SSE event: an optional `event:` name, the joined `data:`
/// lines, and an optional `id:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether this event's payload is the `[DONE]` sentinel some streaming
    /// chat-completions APIs send in place of a final empty `data:`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

#[derive(Debug, Default)]
struct PendingEvent {
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
}

impl PendingEvent {
    fn has_data(&self) -> bool {
        !self.data_lines.is_empty()
    }

    fn take(&mut self) -> SseEvent {
        SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
            id: self.id.take(),
        }
    }

    fn apply_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.has_data().then(|| self.take());
        }
        if line.starts_with(':') {
            return None;
        }
        let Some((field, value)) = split_field(line) else {
            return None;
        };
        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }
}

fn split_field(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let field = &line[..colon];
    let value = line[colon + 1..].strip_prefix(' ').unwrap_or(&line[colon + 1..]);
    Some((field, value))
}

/// Streaming-safe SSE decoder: feed it raw bytes as they arrive over the
/// wire via [`Self::push`], and call [`Self::flush`] once the connection
/// closes to recover any event left without a trailing blank line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line_buffer: String,
    pending: PendingEvent,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for ch in String::from_utf8_lossy(chunk).chars() {
            if ch != '\n' {
                self.line_buffer.push(ch);
                continue;
            }
            let line = std::mem::take(&mut self.line_buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.pending.apply_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Recover a trailing event that never received its closing blank line.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.pending.apply_line(line);
        }
        self.pending.has_data().then(|| self.pending.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_single_data_only_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn joins_multiple_data_lines_with_newline() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: line one\ndata: line two\n\n");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn event_and_id_fields_are_captured() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: token\nid: 7\ndata: hi\n\n");
        assert_eq!(events[0].event.as_deref(), Some("token"));
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn handles_chunk_boundaries_splitting_a_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"da").is_empty());
        assert!(decoder.push(b"ta: par").is_empty());
        let events = decoder.push(b"tial\n\n");
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn comment_lines_are_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\ndata: real\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: [DONE]\n\n");
        assert!(events[0].is_done());
    }

    #[test]
    fn flush_recovers_an_event_without_trailing_blank_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: no trailing blank").is_empty());
        let event = decoder.flush().expect("flush should recover pending data");
        assert_eq!(event.data, "no trailing blank");
    }

    #[test]
    fn flush_is_none_when_nothing_pending() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: done\n\n");
        assert!(decoder.flush().is_none());
    }
}
