use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::audio::AudioBlob;

use super::{
    CompletionEvent, CompletionProvider, CompletionRequest, CompletionStream, ProviderError,
    ToolCall, Transcriber,
};

/// One scripted step of a completion round. `Err` fails the stream at that point.
pub type ScriptedEvent = Result<CompletionEvent, String>;

struct Round {
    events: Vec<ScriptedEvent>,
    /// Never end the stream after the scripted events
    hang: bool,
}

/// A provider that replays pre-configured rounds and records every request
pub struct MockProvider {
    rounds: Mutex<VecDeque<Round>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new(rounds: Vec<Vec<ScriptedEvent>>) -> Self {
        Self {
            rounds: Mutex::new(
                rounds
                    .into_iter()
                    .map(|events| Round { events, hang: false })
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Make round `index` stall after its scripted events, like a stuck upstream
    pub fn hang_at(self, index: usize) -> Self {
        if let Some(round) = self.rounds.lock().unwrap().get_mut(index) {
            round.hang = true;
        }
        self
    }

    /// A round that streams `text` in the given pieces and stops
    pub fn text_round(pieces: &[&str]) -> Vec<ScriptedEvent> {
        let mut round: Vec<ScriptedEvent> = pieces
            .iter()
            .map(|p| Ok(CompletionEvent::TextDelta(p.to_string())))
            .collect();
        round.push(Ok(CompletionEvent::Finish("stop".into())));
        round
    }

    /// A round that requests one tool call
    pub fn tool_round(id: &str, name: &str, arguments: serde_json::Value) -> Vec<ScriptedEvent> {
        vec![
            Ok(CompletionEvent::ToolCall(ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            })),
            Ok(CompletionEvent::Finish("tool_calls".into())),
        ]
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, ProviderError> {
        self.requests.lock().unwrap().push(request);

        let round = self.rounds.lock().unwrap().pop_front().unwrap_or_else(|| Round {
            events: vec![Ok(CompletionEvent::Finish("stop".into()))],
            hang: false,
        });

        let events = stream::iter(
            round
                .events
                .into_iter()
                .map(|step| step.map_err(ProviderError::InvalidResponse)),
        );
        if round.hang {
            return Ok(Box::pin(events.chain(stream::pending())));
        }
        Ok(Box::pin(events))
    }
}

/// A transcriber that returns a fixed transcription or fails
pub struct MockTranscriber {
    reply: Result<String, String>,
    received: Mutex<Vec<usize>>,
}

impl MockTranscriber {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Byte sizes of the blobs received so far
    pub fn received(&self) -> Vec<usize> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio: &AudioBlob) -> Result<String, ProviderError> {
        self.received.lock().unwrap().push(audio.bytes.len());
        self.reply.clone().map_err(ProviderError::InvalidResponse)
    }
}
