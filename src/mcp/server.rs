//! MCP server implementation.

use super::protocol::*;
use crate::config::Settings;
use crate::crew::Crew;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

/// MCP Server for DaVinci.
pub struct McpServer {
    settings: Settings,
    crew: Option<Crew>,
}

impl McpServer {
    /// Create a new MCP server. The crew is built on `initialize`.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            crew: None,
        }
    }

    /// Create a server around an existing crew.
    pub fn with_crew(settings: Settings, crew: Crew) -> Self {
        Self {
            settings,
            crew: Some(crew),
        }
    }

    /// Run the MCP server (reads from stdin, writes to stdout).
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        info!("DaVinci MCP server starting");

        while let Some(line) = lines.next_line().await? {
            if let Some(response) = self.handle_line(&line).await {
                let mut payload = serde_json::to_string(&response)?;
                payload.push('\n');
                stdout.write_all(payload.as_bytes()).await?;
                stdout.flush().await?;
            }
        }

        info!("stdin closed, MCP server stopping");
        Ok(())
    }

    /// Handle one line of input. Notifications produce no response.
    pub async fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                Some(JsonRpcResponse::failure(None, ErrorCode::Parse, "Parse error"))
            }
        }
    }

    /// Handle a single JSON-RPC request.
    async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("MCP request: {}", request.method);

        if !request.jsonrpc.is_empty() && request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::failure(
                request.id,
                ErrorCode::InvalidParams,
                "Unsupported JSON-RPC version",
            ));
        }

        if request.id.is_none() && request.method.starts_with("notifications/") {
            return None;
        }

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "initialized" | "ping" => JsonRpcResponse::ok(request.id, json!({})),
            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(request.id, request.params).await,
            _ => JsonRpcResponse::failure(
                request.id,
                ErrorCode::MethodNotFound,
                &format!("Method not found: {}", request.method),
            ),
        };
        Some(response)
    }

    fn handle_initialize(&mut self, id: Option<Value>) -> JsonRpcResponse {
        if self.crew.is_none() {
            match Crew::from_settings(&self.settings) {
                Ok(crew) => {
                    self.crew = Some(crew);
                    info!("Crew initialized");
                }
                Err(e) => {
                    error!("Failed to initialize crew: {}", e);
                    return JsonRpcResponse::failure(
                        id,
                        ErrorCode::Server,
                        &format!("Init failed: {}", e),
                    );
                }
            }
        }

        JsonRpcResponse::ok(id, InitializeResult::davinci())
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::ok(id, ToolsListResult::new(self.settings.server.expose_plot_tool))
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: CallParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::failure(
                    id,
                    ErrorCode::InvalidParams,
                    &format!("Invalid params: {}", e),
                )
            }
            None => return JsonRpcResponse::failure(id, ErrorCode::InvalidParams, "Missing params"),
        };

        let Some(crew) = &self.crew else {
            return JsonRpcResponse::ok(
                id,
                CallResult::from(Err(crate::DavinciError::Agent("Server not initialized".to_string()))),
            );
        };

        let result = match params.parse() {
            Ok(McpCall::Ask(ask)) => crew.kickoff(&ask.question).await.map(|output| output.raw),
            Ok(McpCall::Tool(tool)) => {
                crew.tools()
                    .execute_exposed(&tool, self.settings.server.expose_plot_tool)
                    .await
            }
            Err(e) => Err(e),
        };

        JsonRpcResponse::ok(id, CallResult::from(result))
    }
}
