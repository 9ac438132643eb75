//! CLI command implementations.

mod ask;
mod config;
mod doctor;
mod mcp;
mod serve;
mod tool;

pub use ask::run_ask;
pub use config::run_config;
pub use doctor::run_doctor;
pub use mcp::run_mcp;
pub use serve::run_serve;
pub use tool::{run_tool, run_tools};
