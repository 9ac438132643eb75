//! Declarative agent and task definitions for the crew.
//!
//! Defaults are compiled in from `crew/agents.toml` and `crew/tasks.toml`.
//! Either file can be replaced by placing a file with the same name in the
//! custom crew directory.

use crate::error::{DavinciError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

const DEFAULT_AGENTS: &str = include_str!("../../crew/agents.toml");
const DEFAULT_TASKS: &str = include_str!("../../crew/tasks.toml");

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("valid placeholder regex"));

/// One agent role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub role: String,
    pub goal: String,
    pub backstory: String,
}

impl AgentConfig {
    /// System prompt presented to the model for this role.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are {}. {}\n\nYour personal goal is: {}\n\n\
             Use the tools available to you when you need data. \
             When you have enough information, reply with your final answer only.",
            self.role, self.backstory, self.goal
        )
    }
}

/// One task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task description; may reference `{user_question}`.
    pub description: String,
    /// Description of the output the task should produce.
    pub expected_output: String,
    /// Key of the agent performing the task.
    pub agent: String,
}

/// Agents and tasks of the crew, keyed by name.
#[derive(Debug, Clone)]
pub struct CrewConfig {
    pub agents: HashMap<String, AgentConfig>,
    pub tasks: HashMap<String, TaskConfig>,
}

impl CrewConfig {
    /// Load the bundled definitions, replaced by files in `custom_dir` if present.
    pub fn load(custom_dir: Option<&str>) -> Result<Self> {
        let mut agents_src = DEFAULT_AGENTS.to_string();
        let mut tasks_src = DEFAULT_TASKS.to_string();

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let agents_path = custom_path.join("agents.toml");
            if agents_path.exists() {
                agents_src = std::fs::read_to_string(&agents_path)?;
            }

            let tasks_path = custom_path.join("tasks.toml");
            if tasks_path.exists() {
                tasks_src = std::fs::read_to_string(&tasks_path)?;
            }
        }

        let config = Self {
            agents: toml::from_str(&agents_src)?,
            tasks: toml::from_str(&tasks_src)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that every task names a defined agent.
    pub fn validate(&self) -> Result<()> {
        for (name, task) in &self.tasks {
            if !self.agents.contains_key(&task.agent) {
                return Err(DavinciError::Config(format!(
                    "Task '{}' references unknown agent '{}'",
                    name, task.agent
                )));
            }
        }
        Ok(())
    }

    pub fn agent(&self, name: &str) -> Result<&AgentConfig> {
        self.agents
            .get(name)
            .ok_or_else(|| DavinciError::Config(format!("Agent '{}' is not defined", name)))
    }

    pub fn task(&self, name: &str) -> Result<&TaskConfig> {
        self.tasks
            .get(name)
            .ok_or_else(|| DavinciError::Config(format!("Task '{}' is not defined", name)))
    }

    /// Interpolate `{name}` placeholders; unknown placeholders are left as-is.
    pub fn render(template: &str, inputs: &HashMap<String, String>) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &regex::Captures| {
                inputs
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_definitions_are_complete() {
        let config = CrewConfig::load(None).unwrap();
        for agent in [
            "prompt_analyzer",
            "query_creator",
            "data_searcher",
            "data_visualizer",
            "lead_data_analyst",
        ] {
            assert!(config.agents.contains_key(agent), "missing agent {}", agent);
        }
        for task in [
            "analyze_prompt_task",
            "create_query_task",
            "search_external_task",
            "create_plots_task",
            "answer_question_task",
        ] {
            assert!(config.tasks.contains_key(task), "missing task {}", task);
        }
    }

    #[test]
    fn test_render_user_question() {
        let mut inputs = HashMap::new();
        inputs.insert("user_question".to_string(), "How did Italy do?".to_string());

        let rendered = CrewConfig::render("Question: {user_question} ({other})", &inputs);
        assert_eq!(rendered, "Question: How did Italy do? ({other})");
    }

    #[test]
    fn test_custom_dir_overrides_tasks_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tasks.toml"),
            r#"
            [only_task]
            description = "Do {user_question}"
            expected_output = "Something"
            agent = "prompt_analyzer"
            "#,
        )
        .unwrap();

        let config = CrewConfig::load(dir.path().to_str()).unwrap();
        assert_eq!(config.tasks.len(), 1);
        assert_eq!(config.agents.len(), 5);
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tasks.toml"),
            r#"
            [orphan]
            description = "x"
            expected_output = "y"
            agent = "nobody"
            "#,
        )
        .unwrap();

        assert!(matches!(
            CrewConfig::load(dir.path().to_str()),
            Err(DavinciError::Config(_))
        ));
    }
}
