//! Incremental server-sent events decoder.

/// One dispatched event.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_empty() && self.id.is_none() && self.retry.is_none()
    }

    /// Event name, defaulting to `message` when the server sent none.
    pub fn name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Accepts raw body chunks and yields complete events.
///
/// Bytes are buffered until a full line is available, so multi-byte characters and lines
/// split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    current: SseEvent,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return any events it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.current.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.current));
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.current.event = Some(value.to_string()),
            "data" => {
                if !self.current.data.is_empty() {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
            }
            "id" => self.current.id = Some(value.to_string()),
            "retry" => {
                if let Ok(parsed) = value.parse::<u64>() {
                    self.current.retry = Some(parsed);
                }
            }
            _ => {}
        }
        None
    }

    /// Flush a final event left unterminated when the body ends.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        if self.current.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.current))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: hello\ndata: world\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello\nworld");
        assert_eq!(events[0].name(), "message");
    }

    #[test]
    fn ignores_comments_and_reads_event_name() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keep-alive\nevent: thread.run.created\ndata: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "thread.run.created");
    }

    #[test]
    fn reassembles_events_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: thread.mess").is_empty());
        assert!(parser.push(b"age.delta\r\ndata: {\"t\":\"caf\xC3").is_empty());
        let events = parser.push(b"\xA9\"}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("thread.message.delta"));
        assert_eq!(events[0].data, "{\"t\":\"café\"}");
    }

    #[test]
    fn handles_retry_and_id() {
        let mut parser = SseParser::new();
        let events = parser.push(b"id: 42\nretry: 1500\ndata: ok\n\n");
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert_eq!(events[0].retry, Some(1500));
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: done\ndata: [DONE]").is_empty());
        let last = parser.finish().unwrap();
        assert_eq!(last.name(), "done");
        assert_eq!(last.data, "[DONE]");
        assert!(parser.finish().is_none());
    }
}
