//! Pre-flight checks before expensive operations.
//!
//! Validates that required tools and configuration are available
//! before starting operations that would otherwise fail midway.

use crate::config::{Settings, StorageBackend};
use crate::error::{DavinciError, Result};
use crate::tools::ToolName;
use std::process::Command;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// A full crew run needs the LLM and every tool.
    Ask,
    /// A single tool call.
    Tool(ToolName),
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Ask => {
            check_api_key(settings)?;
            check_interpreter(settings)?;
        }
        Operation::Tool(ToolName::GeneratePlot) => {
            check_interpreter(settings)?;
            check_storage(settings)?;
        }
        Operation::Tool(_) => {
            // Database and HTTP failures surface from the tool itself
        }
    }
    Ok(())
}

/// Check if an API key is configured for the chat endpoint.
///
/// Self-hosted OpenAI-compatible gateways often need no key.
fn check_api_key(settings: &Settings) -> Result<()> {
    if settings.llm.base_url.is_some() {
        return Ok(());
    }
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(DavinciError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(DavinciError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

/// Check that the plot interpreter (and sandbox wrapper, if any) can be started.
fn check_interpreter(settings: &Settings) -> Result<()> {
    if let Some(wrapper) = settings.plot.sandbox_command.first() {
        check_executable(wrapper, "--version")?;
    }
    check_executable(&settings.plot.interpreter, "--version")
}

fn check_storage(settings: &Settings) -> Result<()> {
    if settings.storage.backend == StorageBackend::S3 && settings.storage.bucket.trim().is_empty() {
        return Err(DavinciError::Config(
            "No S3 bucket configured. Set S3_BUCKET_NAME or storage.bucket".to_string(),
        ));
    }
    Ok(())
}

/// Check if an executable is available.
fn check_executable(name: &str, version_arg: &str) -> Result<()> {
    match Command::new(name).arg(version_arg).output() {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DavinciError::Config(format!(
            "{} not found. Install it and ensure it's in your PATH",
            name
        ))),
        Err(e) => Err(DavinciError::Config(format!("{}: {}", name, e))),
    }
}
