//! CLI module for DaVinci.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// DaVinci - PIRLS 2021 data-analysis crew
///
/// Answers natural-language questions about the PIRLS 2021 study with a crew of
/// LLM agents that query the database, fetch external indicators and draw plots.
#[derive(Parser, Debug)]
#[command(name = "davinci")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask the crew a question about PIRLS 2021
    Ask {
        /// The question to ask
        question: String,

        /// Print the output of every task, not only the final answer
        #[arg(long)]
        show_tasks: bool,

        /// Print the full crew output as JSON
        #[arg(long)]
        json: bool,

        /// Tag the run with this id (defaults to a random UUID)
        #[arg(long)]
        call_id: Option<String>,
    },

    /// Run a single tool directly
    Tool {
        /// Tool name (see `davinci tools`)
        name: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// List available tools
    Tools,

    /// Check connectivity and configuration
    Doctor,

    /// Start HTTP API server for integration with other systems
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Start MCP server for AI assistant integration
    Mcp,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
