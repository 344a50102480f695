//! Query gateway over the embedded SQLite database
//!
//! Forwards SQL text to the database verbatim and hands back every statement's
//! rows as column-keyed JSON records. The gateway has no policy of its own:
//! no validation, no read/write distinction.

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Either, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use thiserror::Error;

/// Persisted schema. Applied on startup and quoted verbatim in the
/// assistant's system prompt, so keep the two in sync by keeping one copy.
pub const SCHEMA: &str = r#"CREATE TABLE IF NOT EXISTS user_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id VARCHAR(255) NOT NULL UNIQUE,
    project_type VARCHAR(255) NOT NULL,
    task_name VARCHAR(255) NOT NULL,
    event_start_time TIMESTAMP NOT NULL,
    event_end_time TIMESTAMP
);

CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id VARCHAR(255) NOT NULL UNIQUE,
    project_name VARCHAR(255) NOT NULL,
    project_status VARCHAR(50) NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id VARCHAR(255) NOT NULL UNIQUE,
    task_name VARCHAR(255) NOT NULL,
    task_status VARCHAR(50) NOT NULL DEFAULT 'Not Started',
    project_id VARCHAR(255) NOT NULL,
    effort VARCHAR(50) NOT NULL
);

CREATE TABLE IF NOT EXISTS graphs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title VARCHAR(255) NOT NULL,
    type VARCHAR(50) NOT NULL,
    data_query TEXT NOT NULL,
    dataset_label VARCHAR(255),
    background_colors TEXT DEFAULT '[''#FF6384'', ''#36A2EB'', ''#FFCE56'', ''#4BC0C0'', ''#9966FF'', ''#FF9F40'']',
    hover_background_colors TEXT,
    should_display BOOLEAN DEFAULT true,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
"#;

/// A single row keyed by column name, in column order
pub type Record = Map<String, Value>;

/// Rows produced by one statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub rows: Vec<Record>,
    pub rows_affected: u64,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the embedded database
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `url` and apply the schema
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        if let Some(path) = url.strip_prefix("sqlite:") {
            let path = std::path::Path::new(path.trim_start_matches("//"));
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.bootstrap().await?;
        Ok(db)
    }

    /// Create an in-memory database with the schema applied
    pub async fn in_memory() -> Result<Self, DbError> {
        // One connection: every new connection to :memory: is a fresh database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.bootstrap().await?;
        Ok(db)
    }

    async fn bootstrap(&self) -> Result<(), DbError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::debug!("Database schema ready");
        Ok(())
    }

    /// Execute one or more statements verbatim, one result set per statement
    pub async fn execute(&self, sql: &str) -> Result<Vec<ResultSet>, DbError> {
        let mut results = Vec::new();
        let mut current = ResultSet::default();

        let mut stream = sqlx::raw_sql(sql).fetch_many(&self.pool);
        while let Some(step) = stream.try_next().await? {
            match step {
                Either::Left(done) => {
                    // SQLite carries the change count over from the last write
                    current.rows_affected = if current.rows.is_empty() {
                        done.rows_affected()
                    } else {
                        0
                    };
                    results.push(std::mem::take(&mut current));
                }
                Either::Right(row) => current.rows.push(row_to_record(&row)?),
            }
        }

        // A trailing statement that produced rows without a completion marker
        if !current.rows.is_empty() {
            results.push(current);
        }

        tracing::debug!(statements = results.len(), "Executed SQL");
        Ok(results)
    }

    /// All rows of a table. The name is spliced into the statement as given.
    pub async fn records(&self, table_name: &str) -> Result<Vec<ResultSet>, DbError> {
        self.execute(&format!("SELECT * FROM {};", table_name)).await
    }

    /// Graph definitions flagged for display
    pub async fn visible_graphs(&self) -> Result<Vec<Record>, DbError> {
        let results = self
            .execute("SELECT * FROM graphs WHERE should_display = true;")
            .await?;
        Ok(results.into_iter().next().map(|r| r.rows).unwrap_or_default())
    }
}

fn row_to_record(row: &SqliteRow) -> Result<Record, sqlx::Error> {
    let mut record = Map::new();

    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(idx)?),
                "REAL" => Value::from(row.try_get_unchecked::<f64, _>(idx)?),
                "BOOLEAN" => Value::from(row.try_get_unchecked::<bool, _>(idx)?),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
                    Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(idx)?),
            }
        };

        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}
