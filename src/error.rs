//! Error types for DaVinci.

use thiserror::Error;

/// Library-level error type for DaVinci operations.
#[derive(Error, Debug)]
pub enum DavinciError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Plot generation failed: {0}")]
    Plot(String),

    #[error("Indicator API error: {0}")]
    Indicator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error: {0}")]
    Llm(String),

    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    #[error("Tool {0} can only be called by the crew")]
    ToolNotExposed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Agent error: {0}")]
    Agent(String),
}

/// Result type alias for DaVinci operations.
pub type Result<T> = std::result::Result<T, DavinciError>;
