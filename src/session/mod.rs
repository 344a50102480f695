//! Chat sessions held by the server
//!
//! A session owns one conversation, the draft input box and at most one audio
//! capture. Turns within a session run one at a time, but the session state is
//! only locked for short updates, so the growing reply can be read mid-turn.

use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{Mutex as TurnLock, RwLock};
use uuid::Uuid;

use crate::audio::{AudioError, CaptureSession, LEVEL_BARS};
use crate::conversation::{Conversation, ConversationError, Message};
use crate::core::{ChatEngine, ChatError};
use crate::providers::{ProviderError, Transcriber};
use crate::state::AppStore;
use crate::stream::Reassembler;

/// Recorded on a reply whose turn was dropped before the stream ended
pub const ABANDONED_TURN: &str = "Response abandoned before it finished";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    #[error("Chat is disabled")]
    ChatDisabled,

    #[error("Message is empty")]
    EmptyInput,

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("Transcription failed: {0}")]
    Transcription(#[from] ProviderError),
}

/// Public view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub messages: Vec<Message>,
    pub draft_input: String,
    pub streaming: bool,
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<[f32; LEVEL_BARS]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    conversation: Conversation,
    draft_input: String,
    last_error: Option<String>,
    capture: Option<CaptureSession>,
}

#[derive(Debug)]
pub struct ChatSession {
    id: Uuid,
    turn: TurnLock<()>,
    state: Mutex<SessionState>,
}

/// Freezes the open reply if a turn is dropped before its stream ends
struct PendingTurn<'a> {
    session: &'a ChatSession,
    store: &'a AppStore,
    done: bool,
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        let mut state = self.session.state();
        if state.conversation.is_streaming() {
            tracing::warn!(session = %self.session.id, "Assistant turn abandoned");
            state.last_error = Some(ABANDONED_TURN.to_string());
            let _ = state.conversation.finish_streaming(None);
        }
        self.store.increment_data_version();
    }
}

impl ChatSession {
    pub fn new() -> Self {
        let state = SessionState::default();
        Self {
            id: state.conversation.id,
            turn: TurnLock::new(()),
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Held only for short, non-async updates
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_recording(&self) -> bool {
        self.state().capture.is_some()
    }

    pub fn view(&self) -> SessionView {
        let state = self.state();
        SessionView {
            id: self.id,
            messages: state.conversation.messages.clone(),
            draft_input: state.draft_input.clone(),
            streaming: state.conversation.is_streaming(),
            recording: state.capture.is_some(),
            levels: state.capture.as_ref().map(|c| *c.levels()),
            last_error: state.last_error.clone(),
        }
    }

    /// Run one user turn and return the finished assistant message.
    ///
    /// Upstream failures do not fail the call: the partial reply is kept and
    /// the error is recorded on the session. Dropping the returned future
    /// freezes the partial reply the same way.
    pub async fn send(
        &self,
        engine: &ChatEngine,
        store: &AppStore,
        text: &str,
    ) -> Result<Message, SessionError> {
        if !store.is_chat_enabled() {
            return Err(SessionError::ChatDisabled);
        }
        if text.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }

        let _turn = self.turn.lock().await;

        let mut frames = {
            let mut state = self.state();
            state.conversation.add_user(text);
            state.draft_input.clear();
            state.last_error = None;

            let frames = engine.reply(&state.conversation.messages)?;
            state.conversation.begin_assistant()?;
            frames
        };
        let mut pending = PendingTurn {
            session: self,
            store,
            done: false,
        };

        let mut reassembler = Reassembler::new();
        while let Some(chunk) = frames.next().await {
            let snapshot = reassembler.push(&chunk);
            self.state().conversation.update_streaming(snapshot)?;
        }
        reassembler.finish();

        let mut state = self.state();
        state.conversation.update_streaming(reassembler.text())?;

        if let Some(error) = reassembler.error() {
            tracing::error!(session = %self.id, "Assistant turn failed: {}", error);
            state.last_error = Some(error.to_string());
        }

        state
            .conversation
            .finish_streaming(reassembler.steps().map(str::to_string))?;
        pending.done = true;
        store.increment_data_version();

        state
            .conversation
            .last()
            .cloned()
            .ok_or(SessionError::Conversation(ConversationError::NotStreaming))
    }

    pub fn start_audio(&self) -> Result<(), SessionError> {
        let mut state = self.state();
        if state.capture.is_some() {
            return Err(AudioError::AlreadyRecording.into());
        }
        state.capture = Some(CaptureSession::start());
        Ok(())
    }

    pub fn push_chunk(&self, chunk: &[u8]) -> Result<usize, SessionError> {
        let mut state = self.state();
        let capture = state.capture.as_mut().ok_or(AudioError::NotRecording)?;
        capture.push_chunk(chunk);
        Ok(capture.recorded_bytes())
    }

    pub fn record_levels(&self, bins: &[u8]) -> Result<[f32; LEVEL_BARS], SessionError> {
        let mut state = self.state();
        let capture = state.capture.as_mut().ok_or(AudioError::NotRecording)?;
        capture.record_levels(bins);
        Ok(*capture.levels())
    }

    /// Stop recording and place the transcription in the draft input.
    /// The capture is released on every path.
    pub async fn stop_audio(&self, transcriber: &dyn Transcriber) -> Result<String, SessionError> {
        let capture = self
            .state()
            .capture
            .take()
            .ok_or(AudioError::NotRecording)?;

        let result = match capture.stop() {
            Ok(blob) => transcriber.transcribe(&blob).await.map_err(SessionError::from),
            Err(e) => Err(e.into()),
        };

        let mut state = self.state();
        match result {
            Ok(text) => {
                state.draft_input = text.clone();
                state.last_error = None;
                Ok(text)
            }
            Err(e) => {
                tracing::error!(session = %self.id, "Error transcribing audio: {}", e);
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// All live sessions, keyed by id
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<ChatSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Arc<ChatSession> {
        let session = Arc::new(ChatSession::new());
        let id = session.id();

        self.sessions.write().await.insert(id, Arc::clone(&session));
        tracing::info!(session = %id, "Session created");
        session
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<ChatSession>, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    pub async fn close(&self, id: Uuid) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| tracing::info!(session = %id, "Session closed"))
            .ok_or(SessionError::NotFound(id))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
