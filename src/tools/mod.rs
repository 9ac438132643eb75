//! Tools the crew agents can call.
//!
//! Every tool is a typed request/response function. This module holds the
//! closed registry of tool names, their JSON-schema definitions for the chat
//! completions API, argument parsing and dispatch.

pub mod database;
pub mod external;
pub mod history;
pub mod plot;

use crate::config::Settings;
use crate::database::Database;
use crate::error::{DavinciError, Result};
use crate::storage::ObjectStore;
use async_openai::types::{ChatCompletionTool, ChatCompletionToolType, FunctionObject};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

pub use database::{AnswerTable, QuestionnaireTable};
pub use external::{IndicatorClient, IndicatorCode, IndicatorOutcome};
pub use history::PirlsHistory;
pub use plot::{PlotRunner, PLOT_ERROR};

/// Names of all tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    QueryDatabase,
    GetSchemaOfGivenTable,
    GetQuestionTypes,
    GetQuestions,
    GetAnswers,
    GetBenchmarkScores,
    GetScoreMetrics,
    GetCountries,
    GetIndicatorsData,
    GetPreviousPirlsScores,
    GeneratePlot,
}

impl ToolName {
    pub const ALL: [ToolName; 11] = [
        ToolName::QueryDatabase,
        ToolName::GetSchemaOfGivenTable,
        ToolName::GetQuestionTypes,
        ToolName::GetQuestions,
        ToolName::GetAnswers,
        ToolName::GetBenchmarkScores,
        ToolName::GetScoreMetrics,
        ToolName::GetCountries,
        ToolName::GetIndicatorsData,
        ToolName::GetPreviousPirlsScores,
        ToolName::GeneratePlot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::QueryDatabase => "query_database",
            ToolName::GetSchemaOfGivenTable => "get_schema_of_given_table",
            ToolName::GetQuestionTypes => "get_question_types",
            ToolName::GetQuestions => "get_questions",
            ToolName::GetAnswers => "get_answers",
            ToolName::GetBenchmarkScores => "get_benchmark_scores",
            ToolName::GetScoreMetrics => "get_score_metrics",
            ToolName::GetCountries => "get_countries",
            ToolName::GetIndicatorsData => "get_indicators_data",
            ToolName::GetPreviousPirlsScores => "get_previous_pirls_scores",
            ToolName::GeneratePlot => "generate_plot",
        }
    }

    /// Whether repeated identical calls may reuse an earlier result.
    /// Plot generation has side effects and is never cached.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, ToolName::GeneratePlot)
    }

    /// Whether HTTP and MCP callers may run this tool directly.
    /// Plot code executes on the host, so it stays crew-only unless opted in.
    pub fn is_exposed(&self, expose_plot: bool) -> bool {
        expose_plot || !matches!(self, ToolName::GeneratePlot)
    }

    /// Tools outside callers may run directly.
    pub fn exposed(expose_plot: bool) -> Vec<ToolName> {
        Self::ALL
            .into_iter()
            .filter(|t| t.is_exposed(expose_plot))
            .collect()
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::QueryDatabase => {
                "Execute a read-only SQL query against the PIRLS 2021 database and return the rows. \
                Always restrict the result size with WHERE, LIMIT, GROUP BY or aggregates."
            }
            ToolName::GetSchemaOfGivenTable => {
                "Get the columns and data types of a database table."
            }
            ToolName::GetQuestionTypes => {
                "List the distinct question types (topics) of a questionnaire table."
            }
            ToolName::GetQuestions => {
                "List question codes and texts of a questionnaire table, optionally filtered by question types."
            }
            ToolName::GetAnswers => {
                "Get the possible answers of the given question codes from an answers table, as JSON."
            }
            ToolName::GetBenchmarkScores => {
                "List the PIRLS international benchmark names and their score thresholds."
            }
            ToolName::GetScoreMetrics => {
                "List the names and codes of the student score metrics."
            }
            ToolName::GetCountries => {
                "List the participating countries with their codes and database ids."
            }
            ToolName::GetIndicatorsData => {
                "Fetch UNESCO UIS indicator values (education and GDP) for countries in a given year."
            }
            ToolName::GetPreviousPirlsScores => {
                "Get average PIRLS reading scores of earlier cycles (2001 to 2016) for the given country names."
            }
            ToolName::GeneratePlot => {
                "Run Python plotting code that saves a figure and assigns its file name to the variable \
                FILENAME. Returns the public URL of the uploaded figure, or ERROR."
            }
        }
    }

    /// JSON schema of the tool's arguments.
    pub fn parameters(&self) -> serde_json::Value {
        let questionnaire_tables: Vec<&str> =
            QuestionnaireTable::ALL.iter().map(|t| t.as_str()).collect();
        let answer_tables: Vec<&str> = AnswerTable::ALL.iter().map(|t| t.as_str()).collect();
        let indicator_codes: Vec<&str> = IndicatorCode::ALL.iter().map(|c| c.as_str()).collect();

        match self {
            ToolName::QueryDatabase => serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The SQL query to execute" }
                },
                "required": ["query"]
            }),
            ToolName::GetSchemaOfGivenTable => serde_json::json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string", "description": "Name of the table" }
                },
                "required": ["table_name"]
            }),
            ToolName::GetQuestionTypes => serde_json::json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string", "enum": questionnaire_tables }
                },
                "required": ["table_name"]
            }),
            ToolName::GetQuestions => serde_json::json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string", "enum": questionnaire_tables },
                    "types": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Question types to keep (default: all)"
                    }
                },
                "required": ["table_name"]
            }),
            ToolName::GetAnswers => serde_json::json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string", "enum": answer_tables },
                    "codes": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "description": "Question codes"
                    }
                },
                "required": ["table_name", "codes"]
            }),
            ToolName::GetBenchmarkScores | ToolName::GetScoreMetrics | ToolName::GetCountries => {
                serde_json::json!({
                    "type": "object",
                    "properties": {}
                })
            }
            ToolName::GetIndicatorsData => serde_json::json!({
                "type": "object",
                "properties": {
                    "indicators": {
                        "type": "array",
                        "items": { "type": "string", "enum": indicator_codes },
                        "minItems": 1
                    },
                    "countries": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "ISO 3166-1 alpha-3 country codes"
                    },
                    "year": { "type": "integer", "description": "Year of the data (default: 2021)" }
                },
                "required": ["indicators", "countries"]
            }),
            ToolName::GetPreviousPirlsScores => serde_json::json!({
                "type": "object",
                "properties": {
                    "countries": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Country names in English, e.g. Italy"
                    }
                },
                "required": ["countries"]
            }),
            ToolName::GeneratePlot => serde_json::json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Python plotting code" }
                },
                "required": ["code"]
            }),
        }
    }

    /// Function definition for the chat completions API.
    pub fn definition(&self) -> ChatCompletionTool {
        ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: self.as_str().to_string(),
                description: Some(self.description().to_string()),
                parameters: Some(self.parameters()),
                strict: None,
            },
        }
    }
}

impl FromStr for ToolName {
    type Err = DavinciError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DavinciError::ToolNotFound(s.to_string()))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ToolCall {
    QueryDatabase {
        query: String,
    },
    GetSchemaOfGivenTable {
        table_name: String,
    },
    GetQuestionTypes {
        #[serde(deserialize_with = "from_str")]
        table_name: QuestionnaireTable,
    },
    GetQuestions {
        #[serde(deserialize_with = "from_str")]
        table_name: QuestionnaireTable,
        #[serde(default)]
        types: Vec<String>,
    },
    GetAnswers {
        #[serde(deserialize_with = "from_str")]
        table_name: AnswerTable,
        codes: Vec<String>,
    },
    GetBenchmarkScores {},
    GetScoreMetrics {},
    GetCountries {},
    GetIndicatorsData {
        indicators: Vec<IndicatorCode>,
        countries: Vec<String>,
        #[serde(default)]
        year: Option<i32>,
    },
    GetPreviousPirlsScores {
        countries: Vec<String>,
    },
    GeneratePlot {
        code: String,
    },
}

fn from_str<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

impl ToolCall {
    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::QueryDatabase { .. } => ToolName::QueryDatabase,
            ToolCall::GetSchemaOfGivenTable { .. } => ToolName::GetSchemaOfGivenTable,
            ToolCall::GetQuestionTypes { .. } => ToolName::GetQuestionTypes,
            ToolCall::GetQuestions { .. } => ToolName::GetQuestions,
            ToolCall::GetAnswers { .. } => ToolName::GetAnswers,
            ToolCall::GetBenchmarkScores {} => ToolName::GetBenchmarkScores,
            ToolCall::GetScoreMetrics {} => ToolName::GetScoreMetrics,
            ToolCall::GetCountries {} => ToolName::GetCountries,
            ToolCall::GetIndicatorsData { .. } => ToolName::GetIndicatorsData,
            ToolCall::GetPreviousPirlsScores { .. } => ToolName::GetPreviousPirlsScores,
            ToolCall::GeneratePlot { .. } => ToolName::GeneratePlot,
        }
    }

    /// Stable key identifying this call for result caching.
    pub fn cache_key(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse a tool call from its name and JSON arguments.
pub fn parse_tool_call(name: &str, arguments: &str) -> Result<ToolCall> {
    let tool: ToolName = name.parse()?;

    let arguments = if arguments.trim().is_empty() { "{}" } else { arguments };
    let mut args: serde_json::Map<String, serde_json::Value> = serde_json::from_str(arguments)
        .map_err(|e| DavinciError::Agent(format!("Invalid tool arguments: {}", e)))?;
    args.insert("name".to_string(), tool.as_str().into());

    serde_json::from_value(serde_json::Value::Object(args))
        .map_err(|e| DavinciError::InvalidInput(format!("Invalid arguments for {}: {}", tool, e)))
}

/// Function definitions for the given tools.
pub fn tool_definitions(tools: &[ToolName]) -> Vec<ChatCompletionTool> {
    tools.iter().map(|t| t.definition()).collect()
}

/// Shared resources the tools run against.
pub struct ToolContext {
    pub db: Arc<dyn Database>,
    pub history: Arc<PirlsHistory>,
    pub indicators: IndicatorClient,
    pub plot: PlotRunner,
    default_year: i32,
}

impl ToolContext {
    pub fn new(
        db: Arc<dyn Database>,
        history: Arc<PirlsHistory>,
        indicators: IndicatorClient,
        plot: PlotRunner,
        default_year: i32,
    ) -> Self {
        Self {
            db,
            history,
            indicators,
            plot,
            default_year,
        }
    }

    /// Build every tool dependency from the settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let db = crate::database::connect(settings)?;
        let store: Arc<dyn ObjectStore> = crate::storage::connect(settings)?;
        let history_path = settings.history.csv_path.as_deref().map(Settings::expand_path);
        let history = Arc::new(PirlsHistory::load(history_path.as_deref())?);

        Ok(Self::new(
            db,
            history,
            IndicatorClient::new(&settings.indicators)?,
            PlotRunner::new(settings, store),
            settings.indicators.default_year,
        ))
    }

    /// Execute a tool call and return its rendered result.
    pub async fn execute(&self, tool: &ToolCall) -> Result<String> {
        debug!("Executing tool {}", tool.name());
        let db = self.db.as_ref();

        match tool {
            ToolCall::QueryDatabase { query } => database::query_database(db, query).await,
            ToolCall::GetSchemaOfGivenTable { table_name } => {
                database::get_schema_of_given_table(db, table_name).await
            }
            ToolCall::GetQuestionTypes { table_name } => {
                database::get_question_types(db, *table_name).await
            }
            ToolCall::GetQuestions { table_name, types } => {
                database::get_questions(db, *table_name, types).await
            }
            ToolCall::GetAnswers { table_name, codes } => {
                database::get_answers(db, *table_name, codes).await
            }
            ToolCall::GetBenchmarkScores {} => database::get_benchmark_scores(db).await,
            ToolCall::GetScoreMetrics {} => database::get_score_metrics(db).await,
            ToolCall::GetCountries {} => database::get_countries(db).await,
            ToolCall::GetIndicatorsData {
                indicators,
                countries,
                year,
            } => {
                self.indicators
                    .get_indicators_data(indicators, countries, year.unwrap_or(self.default_year))
                    .await
            }
            ToolCall::GetPreviousPirlsScores { countries } => self.history.lookup(countries),
            ToolCall::GeneratePlot { code } => self.plot.generate_plot(code).await,
        }
    }

    /// Parse and execute in one step.
    pub async fn call(&self, name: &str, arguments: &str) -> Result<String> {
        let tool = parse_tool_call(name, arguments)?;
        self.execute(&tool).await
    }

    /// Execute a call coming from outside the crew (HTTP, MCP).
    pub async fn execute_exposed(&self, tool: &ToolCall, expose_plot: bool) -> Result<String> {
        if !tool.name().is_exposed(expose_plot) {
            return Err(DavinciError::ToolNotExposed(tool.name().to_string()));
        }
        self.execute(tool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndicatorSettings;
    use crate::database::SqliteDatabase;
    use crate::storage::LocalObjectStore;

    fn context(storage_root: &std::path::Path) -> ToolContext {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE countries (name TEXT, code TEXT, country_id INTEGER);
             INSERT INTO countries VALUES ('Italy', 'ITA', 17);",
        )
        .unwrap();

        let store = Arc::new(LocalObjectStore::new(storage_root, None).unwrap());
        let mut settings = Settings::default();
        settings.general.temp_dir = storage_root.join("work").to_string_lossy().to_string();

        ToolContext::new(
            Arc::new(db),
            Arc::new(PirlsHistory::bundled().unwrap()),
            IndicatorClient::new(&IndicatorSettings::default()).unwrap(),
            PlotRunner::new(&settings, store),
            2021,
        )
    }

    #[test]
    fn test_tool_names_round_trip() {
        for tool in ToolName::ALL {
            assert_eq!(tool.as_str().parse::<ToolName>().unwrap(), tool);
        }
        assert!(matches!(
            "drop_database".parse::<ToolName>(),
            Err(DavinciError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_only_plot_is_uncached() {
        let uncached: Vec<_> = ToolName::ALL.iter().filter(|t| !t.is_cacheable()).collect();
        assert_eq!(uncached, vec![&ToolName::GeneratePlot]);
    }

    #[test]
    fn test_plot_is_crew_only_by_default() {
        assert!(!ToolName::exposed(false).contains(&ToolName::GeneratePlot));
        assert_eq!(ToolName::exposed(false).len(), ToolName::ALL.len() - 1);
        assert_eq!(ToolName::exposed(true).len(), ToolName::ALL.len());
    }

    #[tokio::test]
    async fn test_execute_exposed_refuses_plot() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let marker = root.path().join("marker");
        let code = format!("open({:?}, 'w').write('x')\n", marker.to_str().unwrap());
        let tool = ToolCall::GeneratePlot { code };

        let result = ctx.execute_exposed(&tool, false).await;
        assert!(matches!(result, Err(DavinciError::ToolNotExposed(_))));
        assert!(!marker.exists());

        let countries = ctx.execute_exposed(&ToolCall::GetCountries {}, false).await.unwrap();
        assert_eq!(countries, "(Name: Italy, Code: ITA, Country_Id: 17)");
    }

    #[test]
    fn test_parse_get_questions() {
        let tool = parse_tool_call(
            "get_questions",
            r#"{"table_name": "TeacherQuestionnaireEntries", "types": ["About You"]}"#,
        )
        .unwrap();
        assert_eq!(
            tool,
            ToolCall::GetQuestions {
                table_name: QuestionnaireTable::TeacherQuestionnaireEntries,
                types: vec!["About You".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_defaults() {
        let tool = parse_tool_call(
            "get_questions",
            r#"{"table_name": "homequestionnaireentries"}"#,
        )
        .unwrap();
        assert!(matches!(tool, ToolCall::GetQuestions { ref types, .. } if types.is_empty()));

        let tool = parse_tool_call("get_countries", "").unwrap();
        assert_eq!(tool, ToolCall::GetCountries {});

        let tool = parse_tool_call(
            "get_indicators_data",
            r#"{"indicators": ["CR.1"], "countries": ["ITA"]}"#,
        )
        .unwrap();
        assert!(matches!(tool, ToolCall::GetIndicatorsData { year: None, .. }));
    }

    #[test]
    fn test_parse_rejects_unknown_table_and_indicator() {
        let result = parse_tool_call("get_question_types", r#"{"table_name": "users"}"#);
        assert!(matches!(result, Err(DavinciError::InvalidInput(_))));

        let result = parse_tool_call(
            "get_indicators_data",
            r#"{"indicators": ["POP.TOTAL"], "countries": ["ITA"]}"#,
        );
        assert!(matches!(result, Err(DavinciError::InvalidInput(_))));

        let result = parse_tool_call("get_answers", "not json");
        assert!(matches!(result, Err(DavinciError::Agent(_))));
    }

    #[test]
    fn test_definitions_follow_whitelist() {
        let defs = tool_definitions(&[ToolName::QueryDatabase, ToolName::GeneratePlot]);
        let names: Vec<_> = defs.iter().map(|d| d.function.name.as_str()).collect();
        assert_eq!(names, vec!["query_database", "generate_plot"]);

        let params = ToolName::GetAnswers.parameters();
        assert_eq!(params["properties"]["table_name"]["enum"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_cache_key_ignores_argument_formatting() {
        let a = parse_tool_call("get_previous_pirls_scores", r#"{"countries": ["Italy"]}"#).unwrap();
        let b = parse_tool_call("get_previous_pirls_scores", "{ \"countries\" : [ \"Italy\" ] }").unwrap();
        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
    }

    #[tokio::test]
    async fn test_execute_dispatches() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());

        let output = ctx.call("get_countries", "{}").await.unwrap();
        assert_eq!(output, "(Name: Italy, Code: ITA, Country_Id: 17)");

        let output = ctx
            .call("query_database", r#"{"query": "SELECT name FROM countries WHERE code = 'ITA'"}"#)
            .await
            .unwrap();
        assert_eq!(
            output,
            "Query: SELECT name FROM countries WHERE code = 'ITA'\nResult:\nItaly"
        );

        let output = ctx
            .call("get_previous_pirls_scores", r#"{"countries": ["Italy", "Atlantis"]}"#)
            .await
            .unwrap();
        assert!(output.contains("\"Italy\""));
        assert!(!output.contains("Atlantis"));
    }

    #[tokio::test]
    async fn test_empty_answer_codes_rejected() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let result = ctx
            .call("get_answers", r#"{"table_name": "studentquestionnaireanswers", "codes": []}"#)
            .await;
        assert!(matches!(result, Err(DavinciError::InvalidInput(_))));
    }
}
