//! MCP command implementation.

use crate::config::Settings;
use crate::mcp::McpServer;
use anyhow::Result;
use tracing::info;

/// Run the MCP server on stdio until stdin closes.
///
/// Logging goes to stderr; stdout carries only JSON-RPC messages.
pub async fn run_mcp(settings: Settings) -> Result<()> {
    info!(
        "Serving MCP with database backend {} and storage backend {:?}",
        settings.database.backend, settings.storage.backend
    );
    McpServer::new(settings).run().await
}
