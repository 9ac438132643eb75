//! Agent runtime for the crew.
//!
//! Each agent is an LLM restricted to a whitelist of tools. It loops over
//! tool calls until the model answers or the iteration budget runs out.

mod runner;

pub use runner::{Agent, AgentResponse, ToolCache, ToolCallRecord};

#[cfg(test)]
pub(crate) use runner::tests as test_support;
