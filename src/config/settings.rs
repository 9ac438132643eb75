//! Configuration settings for DaVinci.

use crate::error::{DavinciError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub llm: LlmSettings,
    pub indicators: IndicatorSettings,
    pub history: HistorySettings,
    pub plot: PlotSettings,
    pub crew: CrewSettings,
    pub server: ServerSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for temporary files (plot sandboxes, local uploads).
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            temp_dir: "/tmp/davinci".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Database backend type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    /// The PIRLS PostgreSQL database (default).
    #[default]
    Postgres,
    /// A local SQLite snapshot of the same tables.
    Sqlite,
}

impl std::str::FromStr for DatabaseBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseBackend::Postgres),
            "sqlite" => Ok(DatabaseBackend::Sqlite),
            _ => Err(format!("Unknown database backend: {}", s)),
        }
    }
}

impl std::fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackend::Postgres => write!(f, "postgres"),
            DatabaseBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Backend (postgres, sqlite).
    pub backend: DatabaseBackend,
    /// PostgreSQL host (`DB_ENDPOINT`).
    pub host: String,
    /// PostgreSQL port (`DB_PORT`).
    pub port: u16,
    /// PostgreSQL user (`DB_USER`).
    pub user: String,
    /// PostgreSQL password (`DB_PASSWORD`).
    pub password: String,
    /// Database name.
    pub name: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Path to the SQLite snapshot (sqlite backend only).
    pub sqlite_path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Postgres,
            host: "localhost".to_string(),
            port: 5432,
            user: "user".to_string(),
            password: "password".to_string(),
            name: "postgres".to_string(),
            max_connections: 5,
            sqlite_path: "~/.davinci/pirls.db".to_string(),
        }
    }
}

/// Object storage backend type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Amazon S3 (default).
    #[default]
    S3,
    /// A local directory, for development.
    Local,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Local => write!(f, "local"),
        }
    }
}

/// Object storage settings for generated plots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Backend (s3, local).
    pub backend: StorageBackend,
    /// S3 bucket name (`S3_BUCKET_NAME`).
    pub bucket: String,
    /// AWS region; falls back to the default provider chain when unset.
    pub region: Option<String>,
    /// Directory receiving uploads (local backend only).
    pub local_dir: String,
    /// Base URL used to build public links (local backend only).
    pub public_base_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            bucket: "bucket".to_string(),
            region: None,
            local_dir: "~/.davinci/plots".to_string(),
            public_base_url: None,
        }
    }
}

/// LLM settings shared by all agents of the crew.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Chat model name.
    pub model: String,
    /// OpenAI-compatible API base URL. None = api.openai.com.
    pub base_url: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: None,
            temperature: 0.0,
            max_tokens: 8192,
            timeout_secs: 300,
        }
    }
}

/// UNESCO indicator API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    /// Endpoint of the indicator data API.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Year used when the caller does not give one.
    pub default_year: i32,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.uis.unesco.org/api/public/data/indicators".to_string(),
            timeout_secs: 30,
            default_year: 2021,
        }
    }
}

/// Historical PIRLS scores settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HistorySettings {
    /// CSV file overriding the bundled scores table.
    pub csv_path: Option<String>,
}

/// Plot sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotSettings {
    /// Interpreter running the plotting snippet.
    pub interpreter: String,
    /// Command prefix wrapping the interpreter (e.g. ["bwrap", "--unshare-net", ...]).
    pub sandbox_command: Vec<String>,
    /// Wall-clock limit for one snippet, in seconds.
    pub timeout_secs: u64,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            sandbox_command: Vec::new(),
            timeout_secs: 60,
        }
    }
}

/// Crew settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrewSettings {
    /// Directory holding agents.toml / tasks.toml overrides.
    pub config_dir: Option<String>,
    /// Maximum LLM iterations per task.
    pub max_iterations: usize,
    /// Cache tool results within one run.
    pub cache_tools: bool,
}

impl Default for CrewSettings {
    fn default() -> Self {
        Self {
            config_dir: None,
            max_iterations: 5,
            cache_tools: true,
        }
    }
}

/// Settings for the HTTP and MCP surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerSettings {
    /// Browser origins allowed to call the HTTP API. Empty sends no CORS headers.
    pub allowed_origins: Vec<String>,
    /// Let outside callers run `generate_plot` directly. Off, plots are only
    /// drawn by the crew itself.
    pub expose_plot_tool: bool,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    ///
    /// Environment variables (`DB_*`, `S3_BUCKET_NAME`) override the file.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let mut settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Settings::default()
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup("DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(user) = lookup("DB_USER") {
            self.database.user = user;
        }
        if let Some(host) = lookup("DB_ENDPOINT") {
            self.database.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            self.database.port = port
                .trim()
                .parse()
                .map_err(|_| DavinciError::Config(format!("DB_PORT is not a valid port: {}", port)))?;
        }
        if let Some(bucket) = lookup("S3_BUCKET_NAME") {
            self.storage.bucket = bucket;
        }
        Ok(())
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DavinciError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("davinci")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded SQLite snapshot path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.database.sqlite_path)
    }

    /// Get the expanded local upload directory.
    pub fn local_storage_dir(&self) -> PathBuf {
        Self::expand_path(&self.storage.local_dir)
    }
}
