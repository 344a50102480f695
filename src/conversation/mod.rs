//! Conversation types and state management

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Summary of the tool activity that produced this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            steps: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            steps: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("No assistant message is streaming")]
    NotStreaming,

    #[error("An assistant message is already streaming")]
    AlreadyStreaming,
}

/// Ordered transcript of one chat session.
///
/// Messages are append-only. The trailing assistant message stays open while
/// its content streams in and is frozen once the stream ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub messages: Vec<Message>,
    #[serde(skip)]
    streaming: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            streaming: false,
        }
    }

    pub fn add_user(&mut self, content: &str) {
        self.messages.push(Message::user(content));
    }

    /// Open an empty assistant message that will receive streamed content
    pub fn begin_assistant(&mut self) -> Result<(), ConversationError> {
        if self.streaming {
            return Err(ConversationError::AlreadyStreaming);
        }
        self.messages.push(Message::assistant(""));
        self.streaming = true;
        Ok(())
    }

    /// Replace the streaming message's content with the latest snapshot
    pub fn update_streaming(&mut self, snapshot: &str) -> Result<(), ConversationError> {
        if !self.streaming {
            return Err(ConversationError::NotStreaming);
        }
        let last = self
            .messages
            .last_mut()
            .ok_or(ConversationError::NotStreaming)?;
        last.content.clear();
        last.content.push_str(snapshot);
        Ok(())
    }

    /// Freeze the streaming message. Steps are attached when present.
    pub fn finish_streaming(&mut self, steps: Option<String>) -> Result<(), ConversationError> {
        if !self.streaming {
            return Err(ConversationError::NotStreaming);
        }
        self.streaming = false;
        if let Some(last) = self.messages.last_mut() {
            if steps.is_some() {
                last.steps = steps;
            }
        }
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
