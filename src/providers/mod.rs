//! Completion and transcription service integrations

pub mod openai_compat;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::audio::AudioBlob;
use crate::tools::ToolDefinition;

pub use openai_compat::{OpenAICompatConfig, OpenAICompatProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry of the history sent to the completion service
#[derive(Debug, Clone, PartialEq)]
pub enum ChatTurn {
    User(String),
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatTurn>,
    pub tools: Vec<ToolDefinition>,
}

/// Incremental output of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    TextDelta(String),
    ToolCall(ToolCall),
    Finish(String),
}

pub type CompletionStream = BoxStream<'static, Result<CompletionEvent, ProviderError>>;

/// A hosted chat completion service with tool calling
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, ProviderError>;
}

/// A hosted speech-to-text service
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioBlob) -> Result<String, ProviderError>;
}
