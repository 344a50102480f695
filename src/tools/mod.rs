//! Tools the assistant can call
//!
//! The tool set is fixed: `weather`, `getRecords` and `executeQuery`. A call
//! from the completion service is parsed into a [`ToolInvocation`] and
//! dispatched by exhaustive match. SQL is passed to the database as given;
//! which statements the assistant should run is a matter for the system
//! prompt, not for this module.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use thiserror::Error;

use crate::db::{Database, DbError};

/// Errors that can occur while preparing or running a tool
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters for {tool}: {reason}")]
    InvalidParameters { tool: String, reason: String },

    #[error(transparent)]
    Database(#[from] DbError),
}

/// Definition of a tool that the assistant can call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name the model uses to call the tool
    pub name: String,

    /// Human-readable description for the model to understand when to use this tool
    pub description: String,

    /// JSON Schema defining the expected parameters
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Result of executing a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful
    pub success: bool,

    /// The output/result of the tool execution
    pub output: Value,

    /// Optional error message if execution failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Execution time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    pub fn success(output: impl Into<Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration_ms: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// A parsed call to one of the fixed tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments")]
pub enum ToolInvocation {
    #[serde(rename = "weather")]
    Weather { location: String },

    #[serde(rename = "getRecords")]
    GetRecords { table_name: String },

    #[serde(rename = "executeQuery")]
    ExecuteQuery { query: String },
}

impl ToolInvocation {
    pub const WEATHER: &'static str = "weather";
    pub const GET_RECORDS: &'static str = "getRecords";
    pub const EXECUTE_QUERY: &'static str = "executeQuery";

    /// Parse a tool call by name and JSON arguments
    pub fn from_call(name: &str, arguments: &Value) -> Result<Self, ToolError> {
        let invalid = |reason: String| ToolError::InvalidParameters {
            tool: name.to_string(),
            reason,
        };

        let string_arg = |key: &str| {
            arguments
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("missing string parameter '{}'", key)))
        };

        match name {
            Self::WEATHER => Ok(Self::Weather {
                location: string_arg("location")?,
            }),
            Self::GET_RECORDS => Ok(Self::GetRecords {
                table_name: string_arg("table_name")?,
            }),
            Self::EXECUTE_QUERY => Ok(Self::ExecuteQuery {
                query: string_arg("query")?,
            }),
            other => Err(ToolError::ToolNotFound(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Weather { .. } => Self::WEATHER,
            Self::GetRecords { .. } => Self::GET_RECORDS,
            Self::ExecuteQuery { .. } => Self::EXECUTE_QUERY,
        }
    }
}

/// Runs tool invocations against the database
#[derive(Clone)]
pub struct ToolExecutor {
    db: Database,
}

impl ToolExecutor {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Tool schemas advertised to the completion service
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(ToolInvocation::WEATHER, "Get the weather in a location")
                .with_parameters(json!({
                    "type": "object",
                    "properties": {
                        "location": {
                            "type": "string",
                            "description": "The location to get the weather for"
                        }
                    },
                    "required": ["location"]
                })),
            ToolDefinition::new(
                ToolInvocation::GET_RECORDS,
                "Get all records from a specified table",
            )
            .with_parameters(json!({
                "type": "object",
                "properties": {
                    "table_name": {
                        "type": "string",
                        "description": "The name of the table to get records from"
                    }
                },
                "required": ["table_name"]
            })),
            ToolDefinition::new(ToolInvocation::EXECUTE_QUERY, "Execute a custom SQL query")
                .with_parameters(json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The SQL query to execute"
                        }
                    },
                    "required": ["query"]
                })),
        ]
    }

    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolError> {
        match invocation {
            ToolInvocation::Weather { location } => Ok(json!({
                "location": location,
                "temperature": 69,
            })),
            ToolInvocation::GetRecords { table_name } => {
                let records = self.db.records(table_name).await?;
                Ok(json!({ "records": records }))
            }
            ToolInvocation::ExecuteQuery { query } => {
                let result = self.db.execute(query).await?;
                Ok(json!({ "result": result }))
            }
        }
    }

    /// Parse and run a raw tool call, folding every failure into the result
    pub async fn call(&self, name: &str, arguments: &Value) -> ToolResult {
        let started = Instant::now();

        let outcome = match ToolInvocation::from_call(name, arguments) {
            Ok(invocation) => {
                tracing::debug!(tool = name, "Executing tool");
                self.execute(&invocation).await
            }
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(output) => ToolResult::success(output),
            Err(e) => {
                tracing::warn!(tool = name, "Tool call failed: {}", e);
                ToolResult::failure(e.to_string())
            }
        };

        result.with_duration(started.elapsed().as_millis() as u64)
    }
}
