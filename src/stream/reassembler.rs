//! Reassembles a framed byte stream into the assistant's message text
//!
//! Bytes are buffered until a newline, so a frame split across two chunks is
//! decoded once the second chunk arrives. Only text frames contribute; every
//! other frame is recorded and everything unrecognized is skipped.

use serde_json::Value;

use super::frame::Frame;

#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Vec<u8>,
    text: String,
    tool_calls: Vec<Value>,
    error: Option<String>,
    finish: Option<Value>,
    ignored_lines: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the accumulated text so far
    pub fn push(&mut self, chunk: &[u8]) -> &str {
        self.pending.extend_from_slice(chunk);

        while let Some(idx) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=idx).collect();
            self.apply_line(&line[..line.len() - 1]);
        }

        &self.text
    }

    /// Process any unterminated trailing line and return the final text
    pub fn finish(&mut self) -> &str {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.apply_line(&line);
        }
        &self.text
    }

    fn apply_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        if line.trim().is_empty() {
            return;
        }

        match Frame::decode(&line) {
            Some(Frame::Text(fragment)) => self.text.push_str(&fragment),
            Some(Frame::ToolCall(call)) => self.tool_calls.push(call),
            Some(Frame::ToolResult(_)) => {}
            Some(Frame::Error(message)) => self.error = Some(message),
            Some(Frame::Finish(finish)) => self.finish = Some(finish),
            None => {
                self.ignored_lines += 1;
                tracing::warn!("Ignoring unrecognized stream line");
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_calls(&self) -> &[Value] {
        &self.tool_calls
    }

    /// Error reported by the producer, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish
            .as_ref()
            .and_then(|f| f.get("finishReason"))
            .and_then(Value::as_str)
    }

    /// Tool steps reported with the finish frame
    pub fn steps(&self) -> Option<&str> {
        self.finish
            .as_ref()
            .and_then(|f| f.get("steps"))
            .and_then(Value::as_str)
    }

    pub fn ignored_lines(&self) -> usize {
        self.ignored_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode_all(frames: &[Frame]) -> Vec<u8> {
        frames.iter().map(Frame::encode).collect::<String>().into_bytes()
    }

    #[test]
    fn test_concatenates_text_in_order() {
        let fragments = ["Started ", "a \"coding\" task.", "\nAnything else?"];
        let frames: Vec<_> = fragments.iter().map(|f| Frame::text(f)).collect();

        let mut reassembler = Reassembler::new();
        for frame in &frames {
            reassembler.push(frame.encode().as_bytes());
        }

        assert_eq!(reassembler.finish(), fragments.concat());
    }

    #[test]
    fn test_snapshot_after_each_chunk() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(b"0:\"Hel\"\n"), "Hel");
        assert_eq!(reassembler.push(b"0:\"lo\"\n"), "Hello");
    }

    #[test]
    fn test_split_frame_across_chunks() {
        let bytes = encode_all(&[Frame::text("héllo "), Frame::text("wörld")]);

        for split in 1..bytes.len() {
            let mut reassembler = Reassembler::new();
            reassembler.push(&bytes[..split]);
            reassembler.push(&bytes[split..]);
            assert_eq!(reassembler.finish(), "héllo wörld", "split at {split}");
        }
    }

    #[test]
    fn test_non_text_frames_do_not_leak() {
        let bytes = encode_all(&[
            Frame::text("Let me check. "),
            Frame::tool_call("call_1", "getRecords", &json!({"table_name": "tasks"})),
            Frame::tool_result("call_1", &json!({"records": []})),
            Frame::text("No tasks yet."),
            Frame::finish("stop", Some("Step 1: getRecords({}) -> ok")),
        ]);

        let mut reassembler = Reassembler::new();
        reassembler.push(&bytes);

        assert_eq!(reassembler.finish(), "Let me check. No tasks yet.");
        assert_eq!(reassembler.text(), "Let me check. No tasks yet.");
        assert_eq!(reassembler.tool_calls().len(), 1);
        assert_eq!(reassembler.finish_reason(), Some("stop"));
        assert_eq!(reassembler.steps(), Some("Step 1: getRecords({}) -> ok"));
    }

    #[test]
    fn test_unknown_lines_are_ignored() {
        let mut reassembler = Reassembler::new();
        reassembler.push(b"garbage\n8:[1,2]\n0:\"ok\"\n\n");

        assert_eq!(reassembler.finish(), "ok");
        assert_eq!(reassembler.ignored_lines(), 2);
    }

    #[test]
    fn test_error_frame_keeps_partial_text() {
        let mut reassembler = Reassembler::new();
        reassembler.push(&encode_all(&[
            Frame::text("Partial"),
            Frame::Error("upstream closed".into()),
        ]));

        assert_eq!(reassembler.finish(), "Partial");
        assert_eq!(reassembler.error(), Some("upstream closed"));
    }

    #[test]
    fn test_unterminated_tail_processed_on_finish() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(b"0:\"tail\""), "");
        assert_eq!(reassembler.finish(), "tail");
    }
}
