//! The PIRLS data-analysis crew.
//!
//! Five tasks run strictly in sequence. Each task has its own agent, tool
//! whitelist and the outputs of its upstream tasks as context; the last
//! task's output is the answer.

use crate::agent::{Agent, ToolCache, ToolCallRecord};
use crate::config::{CrewConfig, LlmSettings, Settings};
use crate::error::Result;
use crate::openai::create_client;
use crate::tools::{ToolContext, ToolName};
use async_openai::config::OpenAIConfig;
use async_openai::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

const CONTEXT_HEADER: &str = "This is the context you're working with:";
const CONTEXT_SEPARATOR: &str = "\n\n----------\n\n";

/// The tasks of the crew, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    AnalyzePrompt,
    CreateQuery,
    SearchExternal,
    CreatePlots,
    AnswerQuestion,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::AnalyzePrompt,
        TaskKind::CreateQuery,
        TaskKind::SearchExternal,
        TaskKind::CreatePlots,
        TaskKind::AnswerQuestion,
    ];

    /// Key of the task in `tasks.toml`.
    pub fn key(&self) -> &'static str {
        match self {
            TaskKind::AnalyzePrompt => "analyze_prompt_task",
            TaskKind::CreateQuery => "create_query_task",
            TaskKind::SearchExternal => "search_external_task",
            TaskKind::CreatePlots => "create_plots_task",
            TaskKind::AnswerQuestion => "answer_question_task",
        }
    }

    /// Upstream tasks whose outputs this task reads.
    pub fn context(&self) -> &'static [TaskKind] {
        match self {
            TaskKind::AnalyzePrompt => &[],
            TaskKind::CreateQuery => &[TaskKind::AnalyzePrompt],
            TaskKind::SearchExternal => &[TaskKind::AnalyzePrompt, TaskKind::CreateQuery],
            TaskKind::CreatePlots => &[TaskKind::CreateQuery, TaskKind::SearchExternal],
            TaskKind::AnswerQuestion => &[
                TaskKind::CreateQuery,
                TaskKind::SearchExternal,
                TaskKind::CreatePlots,
            ],
        }
    }

    /// Tools the task's agent may call.
    pub fn tools(&self) -> &'static [ToolName] {
        match self {
            TaskKind::AnalyzePrompt => &[
                ToolName::GetSchemaOfGivenTable,
                ToolName::GetQuestionTypes,
                ToolName::GetQuestions,
                ToolName::GetAnswers,
                ToolName::GetBenchmarkScores,
                ToolName::GetScoreMetrics,
                ToolName::GetCountries,
            ],
            TaskKind::CreateQuery => &[ToolName::QueryDatabase],
            TaskKind::SearchExternal => &[
                ToolName::GetIndicatorsData,
                ToolName::GetPreviousPirlsScores,
                ToolName::GetCountries,
            ],
            TaskKind::CreatePlots => &[ToolName::GeneratePlot],
            TaskKind::AnswerQuestion => &[],
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Output of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutput {
    pub task: TaskKind,
    pub agent: String,
    pub raw: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Output of a full crew run.
#[derive(Debug, Clone, Serialize)]
pub struct CrewOutput {
    pub run_id: Uuid,
    /// Output of the final task.
    pub raw: String,
    pub tasks_output: Vec<TaskOutput>,
}

/// The crew: shared LLM client, tools and declarative agent/task definitions.
pub struct Crew {
    client: Arc<Client<OpenAIConfig>>,
    tools: Arc<ToolContext>,
    config: CrewConfig,
    llm: LlmSettings,
    max_iterations: usize,
    cache_tools: bool,
    call_id: Option<String>,
}

impl Crew {
    pub fn new(
        client: Arc<Client<OpenAIConfig>>,
        tools: Arc<ToolContext>,
        config: CrewConfig,
        settings: &Settings,
    ) -> Result<Self> {
        for task in TaskKind::ALL {
            let task_config = config.task(task.key())?;
            config.agent(&task_config.agent)?;
        }

        Ok(Self {
            client,
            tools,
            config,
            llm: settings.llm.clone(),
            max_iterations: settings.crew.max_iterations,
            cache_tools: settings.crew.cache_tools,
            call_id: None,
        })
    }

    /// Build the crew and all its dependencies from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Arc::new(create_client(&settings.llm)?);
        let tools = Arc::new(ToolContext::from_settings(settings)?);
        let config = CrewConfig::load(settings.crew.config_dir.as_deref())?;
        Self::new(client, tools, config, settings)
    }

    /// Tag every LLM request of this crew with `call_id`.
    pub fn with_call_id(mut self, call_id: &str) -> Self {
        self.call_id = Some(call_id.to_string());
        self
    }

    pub fn tools(&self) -> Arc<ToolContext> {
        self.tools.clone()
    }

    /// Prompt of `task` with its inputs filled in.
    pub fn task_prompt(&self, task: TaskKind, inputs: &HashMap<String, String>) -> Result<String> {
        let config = self.config.task(task.key())?;
        Ok(format!(
            "{}\n\nThis is the expected criteria for your final answer: {}\n\
             You MUST return the actual complete content as the final answer, not a summary.",
            CrewConfig::render(config.description.trim(), inputs),
            CrewConfig::render(config.expected_output.trim(), inputs)
        ))
    }

    /// Agent configured for `task`.
    pub fn agent_for(&self, task: TaskKind, cache: Option<Arc<ToolCache>>) -> Result<Agent> {
        let task_config = self.config.task(task.key())?;
        let agent_config = self.config.agent(&task_config.agent)?;

        let mut agent = Agent::new(self.client.clone(), self.tools.clone(), &self.llm)
            .with_system_prompt(&agent_config.system_prompt())
            .with_tools(task.tools())
            .with_max_iterations(self.max_iterations);

        if let Some(call_id) = &self.call_id {
            agent = agent.with_user(call_id);
        }
        if let Some(cache) = cache {
            agent = agent.with_cache(cache);
        }
        Ok(agent)
    }

    /// Run all tasks for `user_question`.
    pub async fn kickoff(&self, user_question: &str) -> Result<CrewOutput> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "crew",
            %run_id,
            call_id = self.call_id.as_deref().unwrap_or("-")
        );
        self.run_tasks(run_id, user_question).instrument(span).await
    }

    async fn run_tasks(&self, run_id: Uuid, user_question: &str) -> Result<CrewOutput> {
        info!("Crew run started");

        let mut inputs = HashMap::new();
        inputs.insert("user_question".to_string(), user_question.to_string());

        let cache = self.cache_tools.then(|| Arc::new(ToolCache::new()));
        let mut outputs: HashMap<TaskKind, String> = HashMap::new();
        let mut tasks_output = Vec::with_capacity(TaskKind::ALL.len());

        for task in TaskKind::ALL {
            info!("Running task {}", task);

            let agent = self.agent_for(task, cache.clone())?;
            let prompt = self.task_prompt(task, &inputs)?;
            let context = render_context(task, &outputs);

            let response = agent.run(&prompt, context.as_deref()).await?;
            info!(
                "Task {} finished after {} iterations and {} tool calls",
                task,
                response.iterations,
                response.tool_calls.len()
            );

            outputs.insert(task, response.content.clone());
            tasks_output.push(TaskOutput {
                task,
                agent: self.config.task(task.key())?.agent.clone(),
                raw: response.content,
                tool_calls: response.tool_calls,
            });
        }

        let raw = tasks_output
            .last()
            .map(|t| t.raw.clone())
            .unwrap_or_default();

        info!("Crew run finished");
        Ok(CrewOutput {
            run_id,
            raw,
            tasks_output,
        })
    }
}

/// Context block built from the outputs of `task`'s upstream tasks.
pub fn render_context(task: TaskKind, outputs: &HashMap<TaskKind, String>) -> Option<String> {
    let parts: Vec<&str> = task
        .context()
        .iter()
        .filter_map(|upstream| outputs.get(upstream).map(|s| s.as_str()))
        .collect();

    if parts.is_empty() {
        return None;
    }
    Some(format!("{}\n{}", CONTEXT_HEADER, parts.join(CONTEXT_SEPARATOR)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::{client, fake_llm, text_message, tool_call_message, tool_context};

    #[test]
    fn test_context_edges_point_upstream() {
        for (i, task) in TaskKind::ALL.iter().enumerate() {
            for upstream in task.context() {
                let position = TaskKind::ALL.iter().position(|t| t == upstream).unwrap();
                assert!(position < i, "{} reads downstream {}", task, upstream);
            }
        }
        assert!(TaskKind::AnalyzePrompt.context().is_empty());
        assert!(!TaskKind::AnswerQuestion.context().contains(&TaskKind::AnalyzePrompt));
    }

    #[test]
    fn test_tool_whitelists() {
        assert_eq!(TaskKind::CreateQuery.tools(), &[ToolName::QueryDatabase]);
        assert_eq!(TaskKind::CreatePlots.tools(), &[ToolName::GeneratePlot]);
        assert!(TaskKind::AnswerQuestion.tools().is_empty());
        assert!(!TaskKind::AnalyzePrompt.tools().contains(&ToolName::QueryDatabase));

        let used: std::collections::HashSet<_> =
            TaskKind::ALL.iter().flat_map(|t| t.tools().iter()).collect();
        assert_eq!(used.len(), ToolName::ALL.len());
    }

    #[test]
    fn test_render_context() {
        let mut outputs = HashMap::new();
        assert_eq!(render_context(TaskKind::CreateQuery, &outputs), None);

        outputs.insert(TaskKind::AnalyzePrompt, "analysis".to_string());
        outputs.insert(TaskKind::CreateQuery, "rows".to_string());
        outputs.insert(TaskKind::SearchExternal, "indicators".to_string());

        assert_eq!(
            render_context(TaskKind::SearchExternal, &outputs).unwrap(),
            "This is the context you're working with:\nanalysis\n\n----------\n\nrows"
        );
        let plots_context = render_context(TaskKind::CreatePlots, &outputs).unwrap();
        assert!(!plots_context.contains("analysis"));
        assert!(plots_context.ends_with("rows\n\n----------\n\nindicators"));
    }

    #[tokio::test]
    async fn test_task_prompt_includes_question() {
        let root = tempfile::tempdir().unwrap();
        let crew = Crew::new(
            client("http://127.0.0.1:9/v1"),
            tool_context(root.path()),
            CrewConfig::load(None).unwrap(),
            &Settings::default(),
        )
        .unwrap();

        let mut inputs = HashMap::new();
        inputs.insert("user_question".to_string(), "How did Italy score?".to_string());

        let prompt = crew.task_prompt(TaskKind::AnalyzePrompt, &inputs).unwrap();
        assert!(prompt.contains("How did Italy score?"));
        assert!(!prompt.contains("{user_question}"));
        assert!(prompt.contains("This is the expected criteria for your final answer:"));

        let agent = crew.agent_for(TaskKind::CreateQuery, None).unwrap();
        assert_eq!(agent.allowed_tools(), &[ToolName::QueryDatabase]);
        assert!(agent.system_prompt().contains("SQL"));
    }

    #[tokio::test]
    async fn test_kickoff_runs_tasks_in_order() {
        let root = tempfile::tempdir().unwrap();
        let base = fake_llm(|body| {
            let messages = body["messages"].as_array().cloned().unwrap_or_default();
            let prompt = messages
                .get(1)
                .and_then(|m| m["content"].as_str())
                .unwrap_or_default()
                .to_string();
            let called_tool = messages.iter().any(|m| m["role"] == "tool");

            if prompt.starts_with("Analyze the following question") && !called_tool {
                tool_call_message("get_countries", "{}")
            } else if prompt.starts_with("Analyze the following question") {
                text_message("analysis: Italy (ITA)")
            } else if body.get("tools").is_none() {
                text_message("Italy scored 537.")
            } else {
                text_message("step done")
            }
        })
        .await;

        let crew = Crew::new(
            client(&base),
            tool_context(root.path()),
            CrewConfig::load(None).unwrap(),
            &Settings::default(),
        )
        .unwrap()
        .with_call_id("call-7");

        let output = crew.kickoff("How did Italy score?").await.unwrap();

        let order: Vec<_> = output.tasks_output.iter().map(|t| t.task).collect();
        assert_eq!(order, TaskKind::ALL.to_vec());
        assert_eq!(output.tasks_output[0].raw, "analysis: Italy (ITA)");
        assert_eq!(output.tasks_output[0].tool_calls.len(), 1);
        assert_eq!(output.tasks_output[0].agent, "prompt_analyzer");
        assert_eq!(output.raw, "Italy scored 537.");
    }
}
