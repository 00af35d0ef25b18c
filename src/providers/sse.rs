use serde_json::Value;

/// A parsed Server-Sent Event.
#[derive(Debug)]
pub struct SseEvent {
    /// `None` for the `[DONE]` terminator or unparseable payloads.
    pub data: Option<Value>,
    pub is_done: bool,
}

/// Incremental SSE decoder. Transport chunks can split events at arbitrary
/// byte positions, so callers push text as it arrives and receive only the
/// events whose terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        // Events are separated by a blank line. Only consume complete frames;
        // the remainder stays buffered for the next push.
        while let Some(pos) = find_frame_end(&self.buffer) {
            let frame: String = self.buffer.drain(..pos).collect();
            // Drop the separator itself
            let sep_len = if self.buffer.starts_with("\r\n\r\n") { 4 } else { 2 };
            self.buffer.drain(..sep_len.min(self.buffer.len()));
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }
        events
    }
}

fn find_frame_end(buffer: &str) -> Option<usize> {
    let lf = buffer.find("\n\n");
    let crlf = buffer.find("\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut data = String::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        }
        // `event:`, `id:` and `retry:` fields are ignored; the chat
        // completions stream carries everything in `data`.
    }
    if data.is_empty() {
        return None;
    }
    let data = data.trim();
    if data == "[DONE]" {
        return Some(SseEvent {
            data: None,
            is_done: true,
        });
    }
    Some(SseEvent {
        data: serde_json::from_str::<Value>(data).ok(),
        is_done: false,
    })
}
