//! Dashboard graph rendering
//!
//! Graph definitions live in the `graphs` table. Each one carries a stored
//! query that must yield `(key, value)` rows; this module runs those queries
//! and shapes the rows into chart-ready series. Drawing is left to the
//! browser's chart library, so the output mirrors its data layout.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

use crate::db::{Database, DbError, Record};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Graph {graph}: {reason}")]
    MalformedDefinition { graph: String, reason: String },

    #[error("Graph {graph}: row {row} has no usable key")]
    MalformedRow { graph: String, row: usize },

    #[error("Graph {graph}: invalid color list: {source}")]
    InvalidColors {
        graph: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Chart kinds understood by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
    Doughnut,
    Radar,
    PolarArea,
}

impl ChartKind {
    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(Value::String(value.to_string())).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub data: Vec<f64>,
    pub background_color: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hover_background_color: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub title: String,
    pub data: ChartData,
}

/// A persisted `graphs` row
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDefinition {
    pub id: i64,
    pub title: String,
    pub kind: ChartKind,
    pub data_query: String,
    pub dataset_label: Option<String>,
    pub background_colors: Option<String>,
    pub hover_background_colors: Option<String>,
}

impl GraphDefinition {
    pub fn from_record(record: &Record) -> Result<Self, GraphError> {
        let id = record.get("id").and_then(Value::as_i64).unwrap_or_default();
        let text = |name: &str| record.get(name).and_then(Value::as_str).map(str::to_string);

        let title = text("title").unwrap_or_default();
        let malformed = |reason: String| GraphError::MalformedDefinition {
            graph: title.clone(),
            reason,
        };

        let kind_name = text("type").ok_or_else(|| malformed("missing type".into()))?;
        let kind = ChartKind::parse(&kind_name)
            .ok_or_else(|| malformed(format!("unknown chart type '{}'", kind_name)))?;
        let data_query = text("data_query").ok_or_else(|| malformed("missing data_query".into()))?;

        Ok(Self {
            id,
            title: title.clone(),
            kind,
            data_query,
            dataset_label: text("dataset_label"),
            background_colors: text("background_colors"),
            hover_background_colors: text("hover_background_colors"),
        })
    }
}

fn midnight_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})T00:00:00\.000Z$").expect("valid regex"))
}

fn numeric_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").expect("valid regex")
    })
}

/// Strip every backslash and the surrounding quote runs from a key
pub fn clean_key(raw: &str) -> String {
    raw.replace('\\', "")
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string()
}

/// Reduce an ISO timestamp at midnight UTC to its bare date
pub fn reduce_date(key: &str) -> String {
    match midnight_date().captures(key) {
        Some(caps) => caps[1].to_string(),
        None => key.to_string(),
    }
}

/// Label for a chart row: cleaned, then date-reduced
pub fn label_for(key: &Value) -> Option<String> {
    let raw = match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    Some(reduce_date(&clean_key(&raw)))
}

/// Numeric value for a chart row; anything unparseable counts as zero
pub fn parse_value(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim_start();
            numeric_prefix()
                .find(s)
                .and_then(|m| m.as_str().parse::<f64>().ok())
        }
        _ => None,
    };

    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Parse a serialized color list such as `['#36A2EB', '#FF6384']`
pub fn parse_colors(serialized: &str) -> Result<Vec<String>, serde_json::Error> {
    serde_json::from_str(&serialized.replace('\'', "\""))
}

/// Turn one definition plus its query rows into a chart
pub fn build_chart(definition: &GraphDefinition, rows: &[Record]) -> Result<Chart, GraphError> {
    let colors_error = |source| GraphError::InvalidColors {
        graph: definition.title.clone(),
        source,
    };

    let background = definition.background_colors.as_deref().ok_or_else(|| {
        GraphError::MalformedDefinition {
            graph: definition.title.clone(),
            reason: "missing background_colors".into(),
        }
    })?;
    let background_color = parse_colors(background).map_err(colors_error)?;
    let hover_background_color = definition
        .hover_background_colors
        .as_deref()
        .map(parse_colors)
        .transpose()
        .map_err(colors_error)?;

    let mut labels = Vec::with_capacity(rows.len());
    let mut data = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        let label = row
            .get("key")
            .and_then(label_for)
            .ok_or_else(|| GraphError::MalformedRow {
                graph: definition.title.clone(),
                row: idx,
            })?;
        labels.push(label);
        data.push(parse_value(row.get("value")));
    }

    Ok(Chart {
        id: definition.id,
        kind: definition.kind,
        title: definition.title.clone(),
        data: ChartData {
            labels,
            datasets: vec![Dataset {
                label: definition.dataset_label.clone().filter(|l| !l.is_empty()),
                data,
                background_color,
                hover_background_color,
            }],
        },
    })
}

/// Render every visible graph. Any failing chart fails the whole batch.
pub async fn render_dashboard(db: &Database) -> Result<Vec<Chart>, GraphError> {
    let definitions = db
        .visible_graphs()
        .await?
        .iter()
        .map(GraphDefinition::from_record)
        .collect::<Result<Vec<_>, _>>()?;

    let mut charts = Vec::with_capacity(definitions.len());
    for definition in &definitions {
        tracing::debug!(graph = %definition.title, "Executing graph query");
        let results = db.execute(&definition.data_query).await?;
        let rows = results.into_iter().next().map(|r| r.rows).unwrap_or_default();
        charts.push(build_chart(definition, &rows)?);
    }

    tracing::info!("Rendered {} chart(s)", charts.len());
    Ok(charts)
}
