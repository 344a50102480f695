//! Line framing for streamed assistant responses
//!
//! Every frame is one line: a kind code, a colon, and a JSON payload.
//!
//! | Code | Frame       | Payload                                   |
//! |------|-------------|-------------------------------------------|
//! | `0`  | text        | JSON string fragment                      |
//! | `9`  | tool call   | `{toolCallId, toolName, args}`            |
//! | `a`  | tool result | `{toolCallId, result}`                    |
//! | `3`  | error       | JSON string                               |
//! | `d`  | finish      | `{finishReason}`                          |

use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    ToolCall(Value),
    ToolResult(Value),
    Error(String),
    Finish(Value),
}

impl Frame {
    pub fn text(fragment: &str) -> Self {
        Frame::Text(fragment.to_string())
    }

    pub fn tool_call(id: &str, name: &str, args: &Value) -> Self {
        Frame::ToolCall(json!({
            "toolCallId": id,
            "toolName": name,
            "args": args,
        }))
    }

    pub fn tool_result(id: &str, result: &Value) -> Self {
        Frame::ToolResult(json!({
            "toolCallId": id,
            "result": result,
        }))
    }

    /// End of turn. `steps` summarizes the tool calls the turn executed.
    pub fn finish(reason: &str, steps: Option<&str>) -> Self {
        match steps {
            Some(steps) => Frame::Finish(json!({ "finishReason": reason, "steps": steps })),
            None => Frame::Finish(json!({ "finishReason": reason })),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Frame::Text(_) => "0",
            Frame::ToolCall(_) => "9",
            Frame::ToolResult(_) => "a",
            Frame::Error(_) => "3",
            Frame::Finish(_) => "d",
        }
    }

    /// Serialize as one newline-terminated line
    pub fn encode(&self) -> String {
        let payload = match self {
            Frame::Text(s) | Frame::Error(s) => Value::String(s.clone()),
            Frame::ToolCall(v) | Frame::ToolResult(v) | Frame::Finish(v) => v.clone(),
        };
        format!("{}:{}\n", self.code(), payload)
    }

    /// Parse one line. Unknown kinds and undecodable payloads yield `None`,
    /// except text, which falls back to quote stripping.
    pub fn decode(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (code, payload) = line.split_once(':')?;

        match code {
            "0" => Some(Frame::Text(decode_text(payload))),
            "3" => serde_json::from_str(payload).ok().map(Frame::Error),
            "9" => serde_json::from_str(payload).ok().map(Frame::ToolCall),
            "a" => serde_json::from_str(payload).ok().map(Frame::ToolResult),
            "d" => serde_json::from_str(payload).ok().map(Frame::Finish),
            _ => None,
        }
    }
}

fn decode_text(payload: &str) -> String {
    match serde_json::from_str::<String>(payload) {
        Ok(text) => text,
        Err(_) => {
            let unquoted = payload.strip_prefix('"').unwrap_or(payload);
            let unquoted = unquoted.strip_suffix('"').unwrap_or(unquoted);
            unquoted.replace("\\n", "\n")
        }
    }
}
