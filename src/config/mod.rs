//! Configuration module for DaVinci.
//!
//! Handles loading application settings and the declarative crew definitions.

mod crew;
mod settings;

pub use crew::{AgentConfig, CrewConfig, TaskConfig};
pub use settings::{
    CrewSettings, DatabaseBackend, DatabaseSettings, GeneralSettings, HistorySettings,
    IndicatorSettings, LlmSettings, PlotSettings, ServerSettings, Settings, StorageBackend,
    StorageSettings,
};
