//! JSON-RPC 2.0 framing and the MCP messages DaVinci exchanges.
//!
//! `tools/call` params are parsed straight into an [`McpCall`]: either a crew
//! run (`ask`) or a typed [`ToolCall`], so argument errors surface before
//! anything executes.

use crate::error::{DavinciError, Result};
use crate::tools::{parse_tool_call, ToolCall, ToolName};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name of the tool running the whole crew.
pub const ASK_TOOL: &str = "ask";

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC error codes the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Parse,
    InvalidParams,
    MethodNotFound,
    Internal,
    /// Crew construction failed.
    Server,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::Parse => -32700,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::Internal => -32603,
            ErrorCode::Server => -32000,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Successful response; a result that fails to serialize becomes an internal error.
    pub fn ok(id: Option<Value>, result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                jsonrpc: "2.0",
                id,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::failure(id, ErrorCode::Internal, &e.to_string()),
        }
    }

    pub fn failure(id: Option<Value>, code: ErrorCode, message: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code: code.code(),
                message: message.to_string(),
            }),
        }
    }
}

/// `initialize` result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: &'static str,
    pub capabilities: Value,
    pub server_info: ServerInfo,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl InitializeResult {
    pub fn davinci() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            capabilities: json!({ "tools": { "listChanged": false } }),
            server_info: ServerInfo {
                name: "davinci",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// One entry of the `tools/list` result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn ask() -> Self {
        Self {
            name: ASK_TOOL,
            description: "Answer a natural-language question about PIRLS 2021. Runs the full \
                analysis crew (database lookups, external indicators, plots) and returns its final answer.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question to answer"
                    }
                },
                "required": ["question"]
            }),
        }
    }
}

impl From<ToolName> for ToolDescriptor {
    fn from(tool: ToolName) -> Self {
        Self {
            name: tool.as_str(),
            description: tool.description(),
            input_schema: tool.parameters(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDescriptor>,
}

impl ToolsListResult {
    /// The crew plus every data tool callable from outside.
    pub fn new(expose_plot: bool) -> Self {
        let mut tools = vec![ToolDescriptor::ask()];
        tools.extend(ToolName::exposed(expose_plot).into_iter().map(ToolDescriptor::from));
        Self { tools }
    }
}

/// Arguments of the `ask` tool.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AskArguments {
    pub question: String,
}

/// `tools/call` params.
#[derive(Debug, Deserialize)]
pub struct CallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// What a `tools/call` asks the server to do.
#[derive(Debug, Clone, PartialEq)]
pub enum McpCall {
    Ask(AskArguments),
    Tool(ToolCall),
}

impl CallParams {
    pub fn parse(self) -> Result<McpCall> {
        let arguments = match self.arguments {
            Value::Null => json!({}),
            other => other,
        };

        if self.name == ASK_TOOL {
            let ask = serde_json::from_value(arguments)
                .map_err(|e| DavinciError::InvalidInput(format!("Invalid arguments for ask: {}", e)))?;
            return Ok(McpCall::Ask(ask));
        }

        parse_tool_call(&self.name, &arguments.to_string()).map(McpCall::Tool)
    }
}

/// `tools/call` result. Tool failures are reported in-band with `isError`.
#[derive(Debug, Serialize)]
pub struct CallResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

impl From<Result<String>> for CallResult {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(text) => Self {
                content: vec![Content::Text { text }],
                is_error: None,
            },
            Err(e) => Self {
                content: vec![Content::Text { text: e.to_string() }],
                is_error: Some(true),
            },
        }
    }
}
