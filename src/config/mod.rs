//! Application configuration

pub mod prompts;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::providers::OpenAICompatConfig;

pub use prompts::{build_system_prompt, builtin as prompts_builtin, PromptError, PromptTemplate};

/// Tool rounds allowed per user turn unless configured otherwise
pub const DEFAULT_MAX_TOOL_ROUNDTRIPS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Read a typed variable, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        _ => Ok(default),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub transcription_model: String,
    pub database_url: String,
    pub max_tool_roundtrips: usize,
    pub prompt_file: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: parse_var("PORT", 3000)?,
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            chat_model: env::var("LOCKEDIN_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
            transcription_model: env::var("LOCKEDIN_TRANSCRIPTION_MODEL")
                .unwrap_or_else(|_| "whisper-1".into()),
            database_url: env::var("LOCKEDIN_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/lockedin.db".into()),
            max_tool_roundtrips: parse_var(
                "LOCKEDIN_MAX_TOOL_ROUNDTRIPS",
                DEFAULT_MAX_TOOL_ROUNDTRIPS,
            )?,
            prompt_file: env::var("LOCKEDIN_PROMPT_FILE").ok().map(PathBuf::from),
            request_timeout_secs: parse_var("LOCKEDIN_REQUEST_TIMEOUT_SECS", 120)?,
        })
    }

    /// Settings for the completion and transcription client
    pub fn provider_config(&self) -> OpenAICompatConfig {
        OpenAICompatConfig {
            base_url: self.openai_base_url.clone(),
            api_key: self.openai_api_key.clone(),
            chat_model: self.chat_model.clone(),
            transcription_model: self.transcription_model.clone(),
            timeout_secs: self.request_timeout_secs,
        }
    }

    /// Base persona: the configured prompt file, or the built-in one
    pub async fn base_prompt(&self) -> Result<String, PromptError> {
        match self.prompt_file {
            Some(ref path) => {
                let template = PromptTemplate::load_from_file(path).await?;
                tracing::info!("Using persona '{}'", template.persona.name);
                Ok(template.system_prompt.content)
            }
            None => Ok(prompts_builtin::ASSISTANT.to_string()),
        }
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            openai_api_key: None,
            openai_base_url: "http://localhost:8000/v1".into(),
            chat_model: "gpt-4o".into(),
            transcription_model: "whisper-1".into(),
            database_url: "sqlite::memory:".into(),
            max_tool_roundtrips: DEFAULT_MAX_TOOL_ROUNDTRIPS,
            prompt_file: None,
            request_timeout_secs: 5,
        }
    }
}
