//! Database abstraction for DaVinci.
//!
//! Provides a trait-based interface over the PIRLS relational database, with
//! a PostgreSQL backend for the hosted database and a SQLite backend for local
//! snapshots.

mod postgres;
mod sqlite;

pub use postgres::PostgresDatabase;
pub use sqlite::SqliteDatabase;

use crate::config::{DatabaseBackend, Settings};
use crate::error::{DavinciError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Keywords indicating that a query bounds its result set.
const RECORD_LIMITERS: [&str; 6] = ["count", "where", "limit", "distinct", "having", "group by"];

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a JSON value, keeping the scalar type.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// A fully materialized result set.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Rows, each with one value per column.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render rows as comma-separated values, one row per line.
    pub fn to_lines(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// SQL dialect differences the tools need to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => format!("?{}", index),
        }
    }

    /// Comma-separated placeholders for `count` parameters starting at `first`.
    pub fn placeholder_list(&self, first: usize, count: usize) -> String {
        (first..first + count)
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Query returning (column name, data type) for the table bound to parameter 1.
    pub fn columns_query(&self) -> &'static str {
        match self {
            Dialect::Postgres => {
                "SELECT column_name::text, data_type::text FROM information_schema.columns \
                 WHERE table_name = LOWER($1) ORDER BY ordinal_position"
            }
            Dialect::Sqlite => "SELECT name, type FROM pragma_table_info(?1) ORDER BY cid",
        }
    }
}

/// Trait for database backends.
#[async_trait]
pub trait Database: Send + Sync {
    /// Dialect used to build parameterized SQL.
    fn dialect(&self) -> Dialect;

    /// Run a query with bound parameters and materialize every row.
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Check that the database is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Open the backend selected in the settings.
///
/// The PostgreSQL pool connects lazily, so this does not touch the network.
pub fn connect(settings: &Settings) -> Result<Arc<dyn Database>> {
    match settings.database.backend {
        DatabaseBackend::Postgres => Ok(Arc::new(PostgresDatabase::connect_lazy(&settings.database)?)),
        DatabaseBackend::Sqlite => Ok(Arc::new(SqliteDatabase::open(&settings.sqlite_path())?)),
    }
}

/// Whether the query text contains any record-limiting keyword.
pub fn is_bounded(sql: &str) -> bool {
    let lowered = sql.trim().to_lowercase();
    RECORD_LIMITERS.iter().any(|word| lowered.contains(word))
}

/// Execute a query, warning when it looks unbounded.
///
/// Errors are logged and returned to the caller unchanged.
pub async fn execute_query(db: &dyn Database, sql: &str, params: &[Value]) -> Result<QueryResult> {
    if !is_bounded(sql) {
        warn!(
            "Query has no record limitation and may return a very large result set: {}",
            sql
        );
    }

    debug!("Executing query: {} ({} params)", sql, params.len());

    match db.fetch_all(sql, params).await {
        Ok(result) => {
            debug!("Query returned {} rows", result.rows.len());
            Ok(result)
        }
        Err(e) => {
            error!("Wrong query, encountered error: {}", e);
            Err(e)
        }
    }
}

/// Fail with an invalid-input error when a bound list is empty.
pub(crate) fn require_non_empty<T>(values: &[T], what: &str) -> Result<()> {
    if values.is_empty() {
        return Err(DavinciError::InvalidInput(format!(
            "At least one {} is required",
            what
        )));
    }
    Ok(())
}
