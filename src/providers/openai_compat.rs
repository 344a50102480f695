//! OpenAI-compatible provider
//!
//! Works with any API that implements the OpenAI chat completions and audio
//! transcription formats (OpenAI itself, Groq, vLLM, LM Studio, LocalAI...).
//! Completions are always requested with `stream: true`; the server-sent
//! `data:` lines are decoded into [`CompletionEvent`]s as they arrive.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::audio::AudioBlob;
use crate::tools::ToolDefinition;

use super::{
    ChatTurn, CompletionEvent, CompletionProvider, CompletionRequest, CompletionStream,
    ProviderError, ToolCall, Transcriber,
};

/// OpenAI-compatible chat message
#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn system(content: &str) -> Self {
        Self {
            role: "system",
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

impl From<&ChatTurn> for ChatMessage {
    fn from(turn: &ChatTurn) -> Self {
        match turn {
            ChatTurn::User(content) => Self {
                role: "user",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatTurn::Assistant {
                content,
                tool_calls,
            } => Self {
                role: "assistant",
                content: (!content.is_empty()).then(|| content.clone()),
                tool_calls: (!tool_calls.is_empty())
                    .then(|| tool_calls.iter().map(ToolCallSpec::from).collect()),
                tool_call_id: None,
            },
            ChatTurn::Tool {
                tool_call_id,
                content,
            } => Self {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ToolCallSpec {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: FunctionCallSpec,
}

#[derive(Debug, Clone, Serialize)]
struct FunctionCallSpec {
    name: String,
    arguments: String,
}

impl From<&ToolCall> for ToolCallSpec {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            call_type: "function",
            function: FunctionCallSpec {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize)]
struct ToolDef {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: FunctionDef,
}

#[derive(Debug, Clone, Serialize)]
struct FunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolDefinition> for ToolDef {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function",
            function: FunctionDef {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDef>,
}

/// One `data:` payload of a streamed completion
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Error response from API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Tool call being assembled from argument fragments
#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialCall {
    fn finish(self) -> ToolCall {
        let arguments = if self.arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&self.arguments).unwrap_or(Value::String(self.arguments))
        };

        ToolCall {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone)]
pub struct OpenAICompatConfig {
    /// Base URL for the API (e.g., https://api.openai.com/v1)
    pub base_url: String,
    /// API key (optional for local servers)
    pub api_key: Option<String>,
    /// Model for chat completions
    pub chat_model: String,
    /// Model for audio transcription
    pub transcription_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAICompatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            chat_model: "gpt-4o".to_string(),
            transcription_model: "whisper-1".to_string(),
            timeout_secs: 120,
        }
    }
}

/// OpenAI-compatible API provider
pub struct OpenAICompatProvider {
    config: OpenAICompatConfig,
    client: Client,
}

impl OpenAICompatProvider {
    pub fn new(config: OpenAICompatConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_none() && config.base_url.contains("api.openai.com") {
            return Err(ProviderError::NotConfigured(
                "OpenAI requires OPENAI_API_KEY".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key {
            Some(ref api_key) => builder.header("Authorization", format!("Bearer {}", api_key)),
            None => builder,
        }
    }

    async fn error_from(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(&body) {
            return ProviderError::InvalidResponse(format!(
                "API error ({}): {}",
                status, error_resp.error.message
            ));
        }
        ProviderError::InvalidResponse(format!("HTTP {}: {}", status, body))
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompatProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, ProviderError> {
        let mut messages = vec![ChatMessage::system(&request.system)];
        messages.extend(request.messages.iter().map(ChatMessage::from));

        let body = ChatCompletionRequest {
            model: self.config.chat_model.clone(),
            messages,
            stream: true,
            tools: request.tools.iter().map(ToolDef::from).collect(),
        };

        let response = self
            .authorize(self.client.post(self.url("chat/completions")))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let mut bytes = response.bytes_stream();

        let stream: CompletionStream = Box::pin(try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut calls: BTreeMap<u64, PartialCall> = BTreeMap::new();
            let mut finished = false;

            'read: while let Some(chunk) = bytes.next().await {
                buffer.extend_from_slice(&chunk?);

                while let Some(idx) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=idx).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(data) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        break 'read;
                    }

                    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
                        ProviderError::InvalidResponse(format!("Failed to parse stream chunk: {} - {}", e, data))
                    })?;

                    for choice in chunk.choices {
                        if let Some(delta) = choice.delta {
                            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                                yield CompletionEvent::TextDelta(text);
                            }
                            for fragment in delta.tool_calls.unwrap_or_default() {
                                let call = calls.entry(fragment.index).or_default();
                                if let Some(id) = fragment.id {
                                    call.id = id;
                                }
                                if let Some(function) = fragment.function {
                                    if let Some(name) = function.name {
                                        call.name.push_str(&name);
                                    }
                                    if let Some(arguments) = function.arguments {
                                        call.arguments.push_str(&arguments);
                                    }
                                }
                            }
                        }

                        if let Some(reason) = choice.finish_reason {
                            for (_, call) in std::mem::take(&mut calls) {
                                yield CompletionEvent::ToolCall(call.finish());
                            }
                            finished = true;
                            yield CompletionEvent::Finish(reason);
                        }
                    }
                }
            }

            if !finished {
                let pending = !calls.is_empty();
                for (_, call) in std::mem::take(&mut calls) {
                    yield CompletionEvent::ToolCall(call.finish());
                }
                yield CompletionEvent::Finish(if pending { "tool_calls" } else { "stop" }.to_string());
            }
        });

        Ok(stream)
    }
}

#[async_trait]
impl Transcriber for OpenAICompatProvider {
    async fn transcribe(&self, audio: &AudioBlob) -> Result<String, ProviderError> {
        let part = reqwest::multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime_type)?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.transcription_model.clone());

        let response = self
            .authorize(self.client.post(self.url("audio/transcriptions")))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let transcription: TranscriptionResponse = response.json().await?;
        Ok(transcription.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OpenAICompatProvider {
        let config = OpenAICompatConfig {
            base_url: server.uri(),
            api_key: Some("test-key".to_string()),
            ..OpenAICompatConfig::default()
        };
        OpenAICompatProvider::new(config).unwrap()
    }

    fn sse(chunks: &[Value]) -> String {
        let mut body: String = chunks
            .iter()
            .map(|c| format!("data: {}\n\n", c))
            .collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "be brief".into(),
            messages: vec![ChatTurn::User("hi".into())],
            tools: crate::tools::ToolExecutor::definitions(),
        }
    }

    #[test]
    fn test_openai_requires_key() {
        let result = OpenAICompatProvider::new(OpenAICompatConfig::default());
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));

        let local = OpenAICompatConfig {
            base_url: "http://localhost:8000/v1".into(),
            ..OpenAICompatConfig::default()
        };
        assert!(OpenAICompatProvider::new(local).is_ok());
    }

    #[test]
    fn test_message_conversion() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "getRecords".into(),
            arguments: json!({"table_name": "tasks"}),
        };
        let assistant = ChatMessage::from(&ChatTurn::Assistant {
            content: String::new(),
            tool_calls: vec![call],
        });
        let json = serde_json::to_value(&assistant).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("content").is_none());
        assert_eq!(json["tool_calls"][0]["function"]["arguments"], r#"{"table_name":"tasks"}"#);

        let tool = ChatMessage::from(&ChatTurn::Tool {
            tool_call_id: "call_1".into(),
            content: "{}".into(),
        });
        assert_eq!(tool.role, "tool");
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_stream_text() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"choices": [{"delta": {"role": "assistant", "content": "Hel"}}]}),
            json!({"choices": [{"delta": {"content": "lo"}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ]);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "gpt-4o", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let events: Vec<_> = provider_for(&server)
            .stream(request())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            events,
            vec![
                CompletionEvent::TextDelta("Hel".into()),
                CompletionEvent::TextDelta("lo".into()),
                CompletionEvent::Finish("stop".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_assembles_tool_call_fragments() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "type": "function", "function": {"name": "executeQuery", "arguments": ""}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"query\": \"SELECT"}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": " 1\"}"}}]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ]);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let events: Vec<_> = provider_for(&server)
            .stream(request())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            events,
            vec![
                CompletionEvent::ToolCall(ToolCall {
                    id: "call_1".into(),
                    name: "executeQuery".into(),
                    arguments: json!({"query": "SELECT 1"}),
                }),
                CompletionEvent::Finish("tool_calls".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_api_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"message": "Incorrect API key"}})),
            )
            .mount(&server)
            .await;

        let err = provider_for(&server).stream(request()).await.err().unwrap();
        assert!(err.to_string().contains("Incorrect API key"));
    }

    #[tokio::test]
    async fn test_transcribe() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "start a coding task"})))
            .mount(&server)
            .await;

        let text = provider_for(&server)
            .transcribe(&AudioBlob::webm(vec![1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(text, "start a coding task");
    }

    #[tokio::test]
    async fn test_transcribe_non_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .transcribe(&AudioBlob::webm(vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }
}
