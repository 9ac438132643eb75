//! OpenAI-compatible client configuration.

use crate::config::LlmSettings;
use crate::error::{DavinciError, Result};
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Create a chat client from the LLM settings.
///
/// The API key is read from `OPENAI_API_KEY`; `base_url` points the client at
/// any OpenAI-compatible endpoint (a Bedrock gateway, a local server, ...).
pub fn create_client(settings: &LlmSettings) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
        .map_err(|e| DavinciError::Config(format!("Failed to create HTTP client: {}", e)))?;

    let mut config = OpenAIConfig::default();
    if let Some(base_url) = settings.base_url.as_deref().filter(|u| !u.is_empty()) {
        config = config.with_api_base(base_url);
    }

    Ok(Client::with_config(config).with_http_client(http_client))
}
