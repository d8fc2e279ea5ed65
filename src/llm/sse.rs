//! Server-sent-events decoding.
//!
//! Transports hand us arbitrary byte chunks; [`LineBuffer`] turns them into
//! complete lines, and [`SseDecoder`] folds those lines into events.

/// Payload value a backend uses to mark the end of a stream.
pub const DONE_MARKER: &str = "[DONE]";

/// One decoded event: optional `event:` name plus the joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// `[DONE]` is a terminal marker, never JSON.
    pub fn is_done_marker(&self) -> bool {
        self.data == DONE_MARKER
    }
}

/// Splits a byte stream into lines.
///
/// Bytes are buffered undecoded until a newline arrives, so a multi-byte
/// character split across two chunks is decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left once the transport is exhausted.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        Some(text.trim_end_matches('\r').to_string())
    }
}

/// Line-oriented event-stream decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    data_lines: Vec<String>,
    event: Option<String>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (terminator already stripped). Returns an event when the
    /// line is the blank terminator of a non-empty event.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.trim().is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data:") {
            self.data_lines.push(data.trim().to_string());
        }
        None
    }

    /// Flush a trailing event that was never blank-line terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.take_event()
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data_lines.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(SseEvent { event, data })
    }
}

/// Decode a complete in-memory body. Convenience for tests and for backends
/// that buffer the whole stream.
pub fn decode_all(body: &str) -> Vec<SseEvent> {
    let mut decoder = SseDecoder::new();
    let mut events: Vec<SseEvent> = body
        .lines()
        .filter_map(|line| decoder.push_line(line))
        .collect();
    events.extend(decoder.finish());
    events
}
