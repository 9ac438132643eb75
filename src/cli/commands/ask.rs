//! Ask command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::crew::Crew;
use anyhow::Result;
use uuid::Uuid;

/// Run the ask command.
pub async fn run_ask(
    question: &str,
    show_tasks: bool,
    json: bool,
    call_id: Option<String>,
    settings: Settings,
) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Ask, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'davinci doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let call_id = call_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let crew = Crew::from_settings(&settings)?.with_call_id(&call_id);

    let spinner = Output::spinner("Crew working...");

    let output = match crew.kickoff(question).await {
        Ok(output) => {
            spinner.finish_and_clear();
            output
        }
        Err(e) => {
            spinner.finish_and_clear();
            Output::error(&format!("Crew run failed: {}", e));
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if show_tasks {
        for task in &output.tasks_output {
            Output::header(&format!("{} ({})", task.task, task.agent));
            for call in &task.tool_calls {
                Output::tool_call(&call.name, &call.arguments, &call.result);
            }
            println!("\n{}", task.raw);
        }
        Output::header("Answer");
    }

    println!("\n{}\n", output.raw);
    Output::kv("Run", &output.run_id.to_string());

    Ok(())
}
