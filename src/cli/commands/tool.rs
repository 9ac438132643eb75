//! Tool commands: run one tool, list all tools.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::tools::{parse_tool_call, ToolContext, ToolName};
use anyhow::Result;

/// Run a single tool and print its raw result.
pub async fn run_tool(name: &str, args: &str, settings: Settings) -> Result<()> {
    let tool = match parse_tool_call(name, args) {
        Ok(tool) => tool,
        Err(e) => {
            Output::error(&format!("{}", e));
            Output::info("Run 'davinci tools' to see tools and their arguments.");
            return Err(e.into());
        }
    };

    if let Err(e) = preflight::check(Operation::Tool(tool.name()), &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let context = ToolContext::from_settings(&settings)?;
    let output = context.execute(&tool).await?;
    println!("{}", output);

    Ok(())
}

/// Print every tool with its description and argument schema.
pub fn run_tools() -> Result<()> {
    Output::header(&format!("Tools ({})", ToolName::ALL.len()));
    for tool in ToolName::ALL {
        println!();
        Output::list_item(&format!("{} - {}", tool.as_str(), tool.description()));
        let schema = tool.parameters();
        if let Some(properties) = schema["properties"].as_object() {
            for (arg, property) in properties {
                let kind = property["type"].as_str().unwrap_or("any");
                Output::kv(&format!("  {}", arg), kind);
            }
        }
    }
    Ok(())
}
