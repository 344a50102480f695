//! Chat engine with tool calling orchestration
//!
//! The ChatEngine turns a conversation into a framed byte stream. It:
//! 1. Builds the system prompt (persona, operating rules, schema)
//! 2. Sends the whole conversation plus the tool set to the completion service
//! 3. Relays text fragments as they stream in
//! 4. Executes requested tool calls and feeds the results back, for a
//!    bounded number of rounds
//! 5. Publishes a summary of the steps taken to the app store

use async_stream::stream;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{build_system_prompt, prompts_builtin, DEFAULT_MAX_TOOL_ROUNDTRIPS};
use crate::conversation::{Message, Role};
use crate::providers::{
    ChatTurn, CompletionEvent, CompletionProvider, CompletionRequest, ProviderError, ToolCall,
};
use crate::state::AppStore;
use crate::stream::Frame;
use crate::tools::{ToolExecutor, ToolResult};

/// Framed response bytes, one frame per line
pub type FrameStream = BoxStream<'static, Bytes>;

/// Errors from the chat engine
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Conversation is empty")]
    EmptyConversation,

    #[error("The last message must come from the user")]
    NoUserTurn,
}

/// The core chat engine
#[derive(Clone)]
pub struct ChatEngine {
    provider: Arc<dyn CompletionProvider>,
    tools: ToolExecutor,
    store: Arc<AppStore>,
    base_prompt: String,
    max_tool_roundtrips: usize,
}

impl ChatEngine {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        tools: ToolExecutor,
        store: Arc<AppStore>,
    ) -> Self {
        Self {
            provider,
            tools,
            store,
            base_prompt: prompts_builtin::ASSISTANT.to_string(),
            max_tool_roundtrips: DEFAULT_MAX_TOOL_ROUNDTRIPS,
        }
    }

    /// Replace the base persona
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = prompt.into();
        self
    }

    pub fn with_max_tool_roundtrips(mut self, rounds: usize) -> Self {
        self.max_tool_roundtrips = rounds;
        self
    }

    /// Convert the transcript into completion history. All of it is sent.
    fn history(messages: &[Message]) -> Result<Vec<ChatTurn>, ChatError> {
        let last = messages.last().ok_or(ChatError::EmptyConversation)?;
        if last.role != Role::User {
            return Err(ChatError::NoUserTurn);
        }

        Ok(messages
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(ChatTurn::User(m.content.clone())),
                Role::Assistant if !m.content.is_empty() => Some(ChatTurn::Assistant {
                    content: m.content.clone(),
                    tool_calls: Vec::new(),
                }),
                _ => None,
            })
            .collect())
    }

    /// Answer the latest user turn as a stream of frames
    pub fn reply(&self, messages: &[Message]) -> Result<FrameStream, ChatError> {
        let mut history = Self::history(messages)?;
        let engine = self.clone();
        let system = build_system_prompt(&self.base_prompt, Utc::now());

        let frames = stream! {
            let mut steps: Vec<String> = Vec::new();
            let mut tool_rounds = 0;

            let finish_reason = loop {
                let request = CompletionRequest {
                    system: system.clone(),
                    messages: history.clone(),
                    tools: ToolExecutor::definitions(),
                };

                let mut completion = match engine.provider.stream(request).await {
                    Ok(completion) => completion,
                    Err(e) => {
                        tracing::error!("Completion request failed: {}", e);
                        yield encode(Frame::Error(e.to_string()));
                        break "error";
                    }
                };

                let mut text = String::new();
                let mut calls: Vec<ToolCall> = Vec::new();
                let mut failure = None;

                while let Some(event) = completion.next().await {
                    match event {
                        Ok(CompletionEvent::TextDelta(delta)) => {
                            text.push_str(&delta);
                            yield encode(Frame::text(&delta));
                        }
                        Ok(CompletionEvent::ToolCall(call)) => calls.push(call),
                        Ok(CompletionEvent::Finish(_)) => {}
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }

                if let Some(e) = failure {
                    tracing::error!("Completion stream failed: {}", e);
                    yield encode(Frame::Error(e.to_string()));
                    break "error";
                }

                if calls.is_empty() {
                    break "stop";
                }

                if tool_rounds >= engine.max_tool_roundtrips {
                    tracing::warn!(
                        "Tool roundtrip limit ({}) reached, dropping {} call(s)",
                        engine.max_tool_roundtrips,
                        calls.len()
                    );
                    break "tool-calls";
                }
                tool_rounds += 1;

                history.push(ChatTurn::Assistant {
                    content: text,
                    tool_calls: calls.clone(),
                });

                for call in calls {
                    yield encode(Frame::tool_call(&call.id, &call.name, &call.arguments));

                    let result = engine.tools.call(&call.name, &call.arguments).await;
                    steps.push(describe_step(steps.len() + 1, &call, &result));

                    let payload = serde_json::to_value(&result).unwrap_or(Value::Null);
                    yield encode(Frame::tool_result(&call.id, &payload));

                    history.push(ChatTurn::Tool {
                        tool_call_id: call.id,
                        content: payload.to_string(),
                    });
                }
            };

            // The finish frame carries this turn's steps; the store keeps the latest for display
            let summary = (!steps.is_empty()).then(|| steps.join("\n"));
            engine.store.set_last_steps(summary.clone());

            tracing::info!(
                tool_rounds,
                finish_reason,
                "Assistant turn complete"
            );
            yield encode(Frame::finish(finish_reason, summary.as_deref()));
        };

        Ok(Box::pin(frames))
    }
}

fn encode(frame: Frame) -> Bytes {
    Bytes::from(frame.encode())
}

fn describe_step(number: usize, call: &ToolCall, result: &ToolResult) -> String {
    format!(
        "Step {}: {}({}) -> {}",
        number,
        call.name,
        call.arguments,
        if result.success { "ok" } else { "failed" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::providers::mock::MockProvider;
    use crate::stream::Reassembler;
    use serde_json::json;

    async fn engine_with(provider: Arc<MockProvider>) -> (ChatEngine, Database, Arc<AppStore>) {
        let db = Database::in_memory().await.unwrap();
        let store = Arc::new(AppStore::new());
        let engine = ChatEngine::new(provider, ToolExecutor::new(db.clone()), Arc::clone(&store));
        (engine, db, store)
    }

    async fn collect(stream: FrameStream) -> Vec<u8> {
        stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flat_map(|b| b.to_vec())
            .collect()
    }

    #[tokio::test]
    async fn test_plain_text_reply() {
        let provider = Arc::new(MockProvider::new(vec![MockProvider::text_round(&[
            "Hi", " there",
        ])]));
        let (engine, _, store) = engine_with(Arc::clone(&provider)).await;

        let bytes = collect(engine.reply(&[Message::user("hello")]).unwrap()).await;
        let mut reassembler = Reassembler::new();
        reassembler.push(&bytes);

        assert_eq!(reassembler.finish(), "Hi there");
        assert_eq!(reassembler.finish_reason(), Some("stop"));
        assert_eq!(store.snapshot().last_steps, None);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].system.contains("CREATE TABLE IF NOT EXISTS graphs"));
        assert_eq!(requests[0].tools.len(), 3);
    }

    #[tokio::test]
    async fn test_full_history_is_sent() {
        let provider = Arc::new(MockProvider::new(vec![MockProvider::text_round(&["ok"])]));
        let (engine, _, _) = engine_with(Arc::clone(&provider)).await;

        let messages = vec![
            Message::user("first"),
            Message::assistant("answer"),
            Message::user("second"),
        ];
        collect(engine.reply(&messages).unwrap()).await;

        assert_eq!(
            provider.requests()[0].messages,
            vec![
                ChatTurn::User("first".into()),
                ChatTurn::Assistant {
                    content: "answer".into(),
                    tool_calls: vec![]
                },
                ChatTurn::User("second".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_task_scenario() {
        let insert = "INSERT INTO user_events (event_id, project_type, task_name, event_start_time, event_end_time) \
                      VALUES ('evt-1', 'coding', 'coding task', '2024-10-15T09:00:00.000Z', NULL);";
        let provider = Arc::new(MockProvider::new(vec![
            MockProvider::tool_round("call_1", "executeQuery", json!({ "query": insert })),
            MockProvider::text_round(&["Started your ", "coding task."]),
        ]));
        let (engine, db, store) = engine_with(Arc::clone(&provider)).await;

        let bytes = collect(engine.reply(&[Message::user("start a coding task")]).unwrap()).await;
        let mut reassembler = Reassembler::new();
        reassembler.push(&bytes);

        assert_eq!(reassembler.finish(), "Started your coding task.");
        assert_eq!(reassembler.tool_calls().len(), 1);

        let results = db.records("user_events").await.unwrap();
        let rows = &results[0].rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["event_end_time"], Value::Null);

        // The tool result went back to the model before the final answer
        let second = &provider.requests()[1];
        assert!(matches!(second.messages.last(), Some(ChatTurn::Tool { tool_call_id, .. }) if tool_call_id == "call_1"));

        let steps = store.snapshot().last_steps.unwrap();
        assert!(steps.starts_with("Step 1: executeQuery("));
        assert!(steps.ends_with("-> ok"));
        assert_eq!(reassembler.steps(), Some(steps.as_str()));
    }

    #[tokio::test]
    async fn test_tool_roundtrip_ceiling() {
        let rounds = (1..=5)
            .map(|i| {
                MockProvider::tool_round(
                    &format!("call_{i}"),
                    "getRecords",
                    json!({"table_name": "tasks"}),
                )
            })
            .collect();
        let provider = Arc::new(MockProvider::new(rounds));
        let (engine, _, store) = engine_with(Arc::clone(&provider)).await;

        let bytes = collect(engine.reply(&[Message::user("loop forever")]).unwrap()).await;
        let mut reassembler = Reassembler::new();
        reassembler.push(&bytes);
        reassembler.finish();

        assert_eq!(reassembler.tool_calls().len(), 3);
        assert_eq!(reassembler.finish_reason(), Some("tool-calls"));
        assert_eq!(provider.requests().len(), 4);
        assert_eq!(store.snapshot().last_steps.unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn test_configured_ceiling() {
        let provider = Arc::new(MockProvider::new(vec![
            MockProvider::tool_round("a", "weather", json!({"location": "Oslo"})),
            MockProvider::tool_round("b", "weather", json!({"location": "Oslo"})),
        ]));
        let (engine, _, _) = engine_with(Arc::clone(&provider)).await;
        let engine = engine.with_max_tool_roundtrips(1);

        let bytes = collect(engine.reply(&[Message::user("weather?")]).unwrap()).await;
        let mut reassembler = Reassembler::new();
        reassembler.push(&bytes);
        reassembler.finish();

        assert_eq!(reassembler.tool_calls().len(), 1);
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_upstream_failure_keeps_partial_text() {
        let provider = Arc::new(MockProvider::new(vec![vec![
            Ok(CompletionEvent::TextDelta("Partial ".into())),
            Err("connection reset".into()),
        ]]));
        let (engine, _, _) = engine_with(Arc::clone(&provider)).await;

        let bytes = collect(engine.reply(&[Message::user("hi")]).unwrap()).await;
        let mut reassembler = Reassembler::new();
        reassembler.push(&bytes);

        assert_eq!(reassembler.finish(), "Partial ");
        assert!(reassembler.error().unwrap().contains("connection reset"));
        assert_eq!(reassembler.finish_reason(), Some("error"));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let provider = Arc::new(MockProvider::new(vec![
            MockProvider::tool_round("x", "dropEverything", json!({})),
            MockProvider::text_round(&["I can't do that."]),
        ]));
        let (engine, _, store) = engine_with(Arc::clone(&provider)).await;

        collect(engine.reply(&[Message::user("drop it")]).unwrap()).await;

        match provider.requests()[1].messages.last() {
            Some(ChatTurn::Tool { content, .. }) => assert!(content.contains("Tool not found")),
            other => panic!("expected tool turn, got {other:?}"),
        }
        assert!(store.snapshot().last_steps.unwrap().ends_with("-> failed"));
    }

    #[test]
    fn test_reply_requires_user_turn() {
        assert!(matches!(
            ChatEngine::history(&[]),
            Err(ChatError::EmptyConversation)
        ));
        assert!(matches!(
            ChatEngine::history(&[Message::user("a"), Message::assistant("b")]),
            Err(ChatError::NoUserTurn)
        ));
    }
}
