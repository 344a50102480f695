//! System prompt for the assistant
//!
//! The prompt is assembled from a base persona, the operating rules for task
//! sessions and dashboard graphs, and the literal database schema. The base
//! persona can be replaced by a TOML file.
//!
//! # Example Prompt File
//!
//! ```toml
//! [persona]
//! name = "Focus Coach"
//! description = "Keeps sessions short and asks before deleting anything"
//!
//! [system_prompt]
//! content = """
//! You are a focus coach...
//! """
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::db::SCHEMA;

/// A persona/prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Persona metadata
    pub persona: PersonaInfo,

    /// The base system prompt
    pub system_prompt: SystemPrompt,
}

/// Persona metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaInfo {
    /// Display name of the persona
    pub name: String,

    /// Brief description
    #[serde(default)]
    pub description: String,
}

/// System prompt content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub content: String,
}

impl PromptTemplate {
    /// Load a template from a TOML file
    pub async fn load_from_file(path: &Path) -> Result<Self, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, PromptError> {
        toml::from_str(content).map_err(|e| PromptError::ParseError(e.to_string()))
    }
}

/// Errors from prompt loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Built-in prompt text
pub mod builtin {
    /// Default persona
    pub const ASSISTANT: &str = r#"You are a helpful assistant.

You will be given a list of tools that you can use to answer the user's question.
Under the hood you have access to an embedded SQL database.
You can use the tools to get information about the user's question or make changes to the database."#;

    /// How the assistant is expected to change data
    pub const OPERATING_RULES: &str = r#"To make updates, you can query records in the table, and also execute statements to update the table.

To start a new user_events record, create a new record in the user_events table with event_end_time as NULL.
To end a user_events record, update the record with event_end_time as the current time."#;

    /// How dashboard graphs are created
    pub const GRAPH_RULES: &str = r#"You should also be able to create new graphs. To create a new graph, insert a new record in the graphs table; the dashboard draws it with a chart library.
The type must be one of: line, bar, pie, doughnut, radar, polarArea.
The data_query is the query that will be used to get the data for the graph.
ALWAYS make sure the data_query is a valid SELECT query returning exactly two columns named key and value. I repeat, key and value.
Colors are lists written like ['#36A2EB'].

Example of inserting into the graphs table (create a graph once per request):
INSERT INTO graphs (title, type, data_query, dataset_label, background_colors, hover_background_colors, should_display) VALUES ('Weekly Event Count', 'line', 'WITH RECURSIVE days(day) AS (SELECT DATE(''now'', ''-6 days'') UNION ALL SELECT DATE(day, ''+1 day'') FROM days WHERE day < DATE(''now'')) SELECT days.day AS key, COUNT(user_events.id) AS value FROM days LEFT JOIN user_events ON DATE(user_events.event_start_time) = days.day GROUP BY days.day ORDER BY days.day', 'Events', '[''#36A2EB'']', '[''#1E90FF'']', true);"#;
}

/// Assemble the full system prompt around a base persona
pub fn build_system_prompt(base: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}\n\n{}\n\nThe current time is {}.\n\nThe database tables are as follows:\n\n{}\n{}",
        base.trim(),
        builtin::OPERATING_RULES,
        now.to_rfc3339_opts(SecondsFormat::Millis, true),
        SCHEMA,
        builtin::GRAPH_RULES,
    )
}
