//! DaVinci - PIRLS data analysis crew
//!
//! A question-answering service over the PIRLS 2021 reading-literacy study.
//! A fixed crew of LLM agents plans, queries, analyses and writes up an
//! answer, calling typed tools against the study database, the UNESCO UIS
//! indicators API, the historical PIRLS scores and a sandboxed plot runner.
//!
//! # Architecture
//!
//! - `config` - Settings and the declarative crew definitions
//! - `database` - Read-only access to the study database (PostgreSQL, SQLite)
//! - `storage` - Object storage for rendered plots (S3, local directory)
//! - `tools` - The tool layer exposed to agents
//! - `agent` - Tool-calling agent loop on top of the chat API
//! - `crew` - Sequential five-task pipeline
//! - `submission` - Entry point for host services
//! - `mcp` - MCP server over stdio
//! - `cli` - Command-line interface
//!
//! # Example
//!
//! ```rust,no_run
//! use davinci::create_submission;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let submission = create_submission("call-42")?;
//!     let answer = submission
//!         .run("How did girls and boys in Italy compare in reading?")
//!         .await?;
//!     println!("{}", answer);
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod config;
pub mod crew;
pub mod database;
pub mod error;
pub mod mcp;
pub mod openai;
pub mod storage;
pub mod submission;
pub mod tools;

pub use error::{DavinciError, Result};
pub use submission::{create_submission, Submission};
