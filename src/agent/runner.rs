//! Agent runner with tool calling loop.

use crate::config::LlmSettings;
use crate::error::{DavinciError, Result};
use crate::tools::{parse_tool_call, tool_definitions, ToolContext, ToolName};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const FINAL_ANSWER_PROMPT: &str = "You have used all available steps. \
Do not call any more tools. Give your best final answer now, based on what you have gathered.";

/// Tool results shared by the agents of one crew run.
#[derive(Debug, Default)]
pub struct ToolCache {
    entries: Mutex<HashMap<String, String>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn insert(&self, key: String, value: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// LLM agent restricted to a whitelist of tools.
pub struct Agent {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    tools: Arc<ToolContext>,
    allowed_tools: Vec<ToolName>,
    max_iterations: usize,
    system_prompt: String,
    user: Option<String>,
    cache: Option<Arc<ToolCache>>,
}

impl Agent {
    /// Create an agent without tools.
    pub fn new(client: Arc<Client<OpenAIConfig>>, tools: Arc<ToolContext>, llm: &LlmSettings) -> Self {
        Self {
            client,
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            tools,
            allowed_tools: Vec::new(),
            max_iterations: 5,
            system_prompt: String::new(),
            user: None,
            cache: None,
        }
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Restrict the agent to these tools.
    pub fn with_tools(mut self, tools: &[ToolName]) -> Self {
        self.allowed_tools = tools.to_vec();
        self
    }

    /// Set maximum iterations for the agent loop.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Tag chat requests with an end-user id.
    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    /// Reuse tool results across agents sharing `cache`.
    pub fn with_cache(mut self, cache: Arc<ToolCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn allowed_tools(&self) -> &[ToolName] {
        &self.allowed_tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Run the agent on a task.
    ///
    /// When the iteration budget is spent while the model still wants tools,
    /// one last request without tools forces a final answer.
    pub async fn run(&self, task: &str, context: Option<&str>) -> Result<AgentResponse> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.clone())
                .build()
                .map_err(|e| DavinciError::Agent(e.to_string()))?
                .into(),
        ];

        let user_message = match context {
            Some(ctx) if !ctx.is_empty() => format!("{}\n\n{}", task, ctx),
            _ => task.to_string(),
        };

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()
                .map_err(|e| DavinciError::Agent(e.to_string()))?
                .into(),
        );

        let mut tool_calls_made = Vec::new();

        for iteration in 1..=self.max_iterations {
            debug!("Agent iteration {}", iteration);

            let request = self.request(messages.clone(), true)?;
            let response = self
                .client
                .chat()
                .create(request)
                .await
                .map_err(|e| DavinciError::Llm(format!("Agent API error: {}", e)))?;

            let choice = response
                .choices
                .first()
                .ok_or_else(|| DavinciError::Agent("No response from model".to_string()))?;

            let tool_calls = match &choice.message.tool_calls {
                Some(calls) if !calls.is_empty() => calls,
                _ => {
                    return Ok(AgentResponse {
                        content: choice.message.content.clone().unwrap_or_default(),
                        tool_calls: tool_calls_made,
                        iterations: iteration,
                    })
                }
            };

            let assistant_msg = ChatCompletionRequestAssistantMessageArgs::default()
                .tool_calls(tool_calls.clone())
                .build()
                .map_err(|e| DavinciError::Agent(e.to_string()))?;
            messages.push(assistant_msg.into());

            for tool_call in tool_calls {
                let record = self.execute_tool_call(tool_call).await;

                let tool_msg = ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(&tool_call.id)
                    .content(record.result.clone())
                    .build()
                    .map_err(|e| DavinciError::Agent(e.to_string()))?;
                messages.push(tool_msg.into());

                tool_calls_made.push(record);
            }
        }

        warn!(
            "Agent reached maximum iterations ({}), forcing a final answer",
            self.max_iterations
        );

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(FINAL_ANSWER_PROMPT)
                .build()
                .map_err(|e| DavinciError::Agent(e.to_string()))?
                .into(),
        );

        let request = self.request(messages, false)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| DavinciError::Llm(format!("Agent API error: {}", e)))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(AgentResponse {
            content,
            tool_calls: tool_calls_made,
            iterations: self.max_iterations + 1,
        })
    }

    #[allow(deprecated)]
    fn request(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        with_tools: bool,
    ) -> Result<CreateChatCompletionRequest> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens);

        if with_tools && !self.allowed_tools.is_empty() {
            args.tools(tool_definitions(&self.allowed_tools));
        }
        if let Some(user) = &self.user {
            args.user(user.as_str());
        }

        args.build().map_err(|e| DavinciError::Agent(e.to_string()))
    }

    /// Execute a single tool call and return a record of it.
    async fn execute_tool_call(&self, tool_call: &ChatCompletionMessageToolCall) -> ToolCallRecord {
        let name = &tool_call.function.name;
        let arguments = &tool_call.function.arguments;

        info!("Agent calling tool: {} with args: {}", name, arguments);

        let result = match self.dispatch(name, arguments).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                format!("Tool error: {}", e)
            }
        };

        ToolCallRecord {
            name: name.clone(),
            arguments: arguments.clone(),
            result,
        }
    }

    async fn dispatch(&self, name: &str, arguments: &str) -> Result<String> {
        let tool = parse_tool_call(name, arguments)?;
        if !self.allowed_tools.contains(&tool.name()) {
            return Err(DavinciError::Agent(format!(
                "Tool {} is not available for this task",
                name
            )));
        }

        let cache = self.cache.as_ref().filter(|_| tool.name().is_cacheable());
        let key = match cache {
            Some(_) => Some(tool.cache_key()?),
            None => None,
        };

        if let (Some(cache), Some(key)) = (cache, &key) {
            if let Some(hit) = cache.get(key) {
                debug!("Tool cache hit for {}", name);
                return Ok(hit);
            }
        }

        let output = self.tools.execute(&tool).await?;

        if let (Some(cache), Some(key)) = (cache, key) {
            cache.insert(key, output.clone());
        }
        Ok(output)
    }
}

/// Response from an agent run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    /// The final response content from the agent.
    pub content: String,
    /// Record of all tool calls made during execution.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Number of iterations (LLM calls) used.
    pub iterations: usize,
}

/// Record of a tool call made by the agent.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    /// Name of the tool called.
    pub name: String,
    /// JSON arguments passed to the tool.
    pub arguments: String,
    /// Result returned by the tool.
    pub result: String,
}

impl std::fmt::Display for ToolCallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.arguments)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{IndicatorSettings, Settings};
    use crate::database::SqliteDatabase;
    use crate::storage::LocalObjectStore;
    use crate::tools::{IndicatorClient, PirlsHistory, PlotRunner};
    use axum::{extract::State, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn tool_context(root: &std::path::Path) -> Arc<ToolContext> {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE countries (name TEXT, code TEXT, country_id INTEGER);
             INSERT INTO countries VALUES ('Italy', 'ITA', 17);",
        )
        .unwrap();

        let mut settings = Settings::default();
        settings.general.temp_dir = root.join("work").to_string_lossy().to_string();
        let store = Arc::new(LocalObjectStore::new(&root.join("plots"), None).unwrap());

        Arc::new(ToolContext::new(
            Arc::new(db),
            Arc::new(PirlsHistory::bundled().unwrap()),
            IndicatorClient::new(&IndicatorSettings::default()).unwrap(),
            PlotRunner::new(&settings, store),
            2021,
        ))
    }

    pub(crate) fn completion(message: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": "stop"
            }]
        })
    }

    pub(crate) fn tool_call_message(name: &str, arguments: &str) -> serde_json::Value {
        serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": { "name": name, "arguments": arguments }
            }]
        })
    }

    pub(crate) fn text_message(content: &str) -> serde_json::Value {
        serde_json::json!({ "role": "assistant", "content": content })
    }

    /// Serve a fake chat completions endpoint and return its API base.
    pub(crate) async fn fake_llm<F>(respond: F) -> String
    where
        F: Fn(&serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        let respond = Arc::new(respond);
        let router = Router::new()
            .route(
                "/v1/chat/completions",
                post(
                    |State(respond): State<Arc<F>>, Json(body): Json<serde_json::Value>| async move {
                        Json(completion(respond(&body)))
                    },
                ),
            )
            .with_state(respond);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    pub(crate) fn client(api_base: &str) -> Arc<Client<OpenAIConfig>> {
        Arc::new(Client::with_config(
            OpenAIConfig::new().with_api_key("test").with_api_base(api_base),
        ))
    }

    fn has_tool_results(body: &serde_json::Value) -> bool {
        body["messages"]
            .as_array()
            .map(|m| m.iter().any(|msg| msg["role"] == "tool"))
            .unwrap_or(false)
    }

    #[test]
    fn test_tool_call_record_display() {
        let record = ToolCallRecord {
            name: "get_countries".to_string(),
            arguments: "{}".to_string(),
            result: "(Name: Italy, Code: ITA, Country_Id: 17)".to_string(),
        };
        assert_eq!(format!("{}", record), "get_countries({})");
    }

    #[tokio::test]
    async fn test_tool_loop_returns_final_answer() {
        let root = tempfile::tempdir().unwrap();
        let base = fake_llm(|body| {
            assert_eq!(body["user"], "call-42");
            if has_tool_results(body) {
                text_message("Italy is in the dataset.")
            } else {
                tool_call_message("get_countries", "{}")
            }
        })
        .await;

        let agent = Agent::new(client(&base), tool_context(root.path()), &LlmSettings::default())
            .with_tools(&[ToolName::GetCountries])
            .with_user("call-42");

        let response = agent.run("Which countries?", None).await.unwrap();
        assert_eq!(response.content, "Italy is in the dataset.");
        assert_eq!(response.iterations, 2);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].result, "(Name: Italy, Code: ITA, Country_Id: 17)");
    }

    #[tokio::test]
    async fn test_exhausted_iterations_force_final_answer() {
        let root = tempfile::tempdir().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        let base = fake_llm(move |body| {
            counter.fetch_add(1, Ordering::SeqCst);
            if body.get("tools").is_some() {
                tool_call_message("get_countries", "{}")
            } else {
                text_message("Final answer without tools.")
            }
        })
        .await;

        let cache = Arc::new(ToolCache::new());
        let agent = Agent::new(client(&base), tool_context(root.path()), &LlmSettings::default())
            .with_tools(&[ToolName::GetCountries])
            .with_max_iterations(3)
            .with_cache(cache.clone());

        let response = agent.run("Loop forever", None).await.unwrap();
        assert_eq!(response.content, "Final answer without tools.");
        assert_eq!(response.tool_calls.len(), 3);
        assert_eq!(requests.load(Ordering::SeqCst), 4);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_outside_whitelist_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let base = fake_llm(|body| {
            if has_tool_results(body) {
                text_message("done")
            } else {
                tool_call_message("generate_plot", r#"{"code": "FILENAME = 'x.png'"}"#)
            }
        })
        .await;

        let agent = Agent::new(client(&base), tool_context(root.path()), &LlmSettings::default())
            .with_tools(&[ToolName::GetCountries]);

        let response = agent.run("Plot", None).await.unwrap();
        assert!(response.tool_calls[0].result.starts_with("Tool error:"));
        assert!(response.tool_calls[0].result.contains("not available"));
    }

    #[tokio::test]
    async fn test_agent_without_tools_sends_no_definitions() {
        let root = tempfile::tempdir().unwrap();
        let base = fake_llm(|body| {
            assert!(body.get("tools").is_none());
            text_message("summary")
        })
        .await;

        let agent = Agent::new(client(&base), tool_context(root.path()), &LlmSettings::default())
            .with_system_prompt("You are the lead analyst.");

        let response = agent.run("Summarize", Some("Context")).await.unwrap();
        assert_eq!(response.content, "summary");
        assert_eq!(response.iterations, 1);
    }
}
