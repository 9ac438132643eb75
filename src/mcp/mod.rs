//! MCP (Model Context Protocol) server for DaVinci.
//!
//! Exposes the crew (`ask`) and the data tools to MCP clients. `generate_plot`
//! stays crew-only unless `server.expose_plot_tool` is set.
//! Implements JSON-RPC 2.0 over stdio.

mod protocol;
mod server;

pub use server::McpServer;
