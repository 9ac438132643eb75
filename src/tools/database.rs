//! Read-only tools over the PIRLS database.
//!
//! Table names are taken from closed enumerations and every user-supplied value
//! is bound as a parameter.

use crate::database::{execute_query, require_non_empty, Database, QueryResult, Value};
use crate::error::{DavinciError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::instrument;

/// Line break escape found in the stored type values of the questionnaire tables.
const ESCAPED_LINE_BREAK: &str = "\\r\\n";
const LINE_BREAK: &str = "\r\n";

/// Questionnaire tables holding question definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionnaireTable {
    StudentQuestionnaireEntries,
    CurriculumQuestionnaireEntries,
    HomeQuestionnaireEntries,
    TeacherQuestionnaireEntries,
    SchoolQuestionnaireEntries,
}

impl QuestionnaireTable {
    pub const ALL: [QuestionnaireTable; 5] = [
        QuestionnaireTable::StudentQuestionnaireEntries,
        QuestionnaireTable::CurriculumQuestionnaireEntries,
        QuestionnaireTable::HomeQuestionnaireEntries,
        QuestionnaireTable::TeacherQuestionnaireEntries,
        QuestionnaireTable::SchoolQuestionnaireEntries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionnaireTable::StudentQuestionnaireEntries => "studentquestionnaireentries",
            QuestionnaireTable::CurriculumQuestionnaireEntries => "curriculumquestionnaireentries",
            QuestionnaireTable::HomeQuestionnaireEntries => "homequestionnaireentries",
            QuestionnaireTable::TeacherQuestionnaireEntries => "teacherquestionnaireentries",
            QuestionnaireTable::SchoolQuestionnaireEntries => "schoolquestionnaireentries",
        }
    }
}

impl std::str::FromStr for QuestionnaireTable {
    type Err = DavinciError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| DavinciError::InvalidInput(format!("Unknown questionnaire table: {}", s)))
    }
}

/// Answer tables, companions of the questionnaire tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerTable {
    StudentQuestionnaireAnswers,
    CurriculumQuestionnaireAnswers,
    HomeQuestionnaireAnswers,
    TeacherQuestionnaireAnswers,
    SchoolQuestionnaireAnswers,
}

impl AnswerTable {
    pub const ALL: [AnswerTable; 5] = [
        AnswerTable::StudentQuestionnaireAnswers,
        AnswerTable::CurriculumQuestionnaireAnswers,
        AnswerTable::HomeQuestionnaireAnswers,
        AnswerTable::TeacherQuestionnaireAnswers,
        AnswerTable::SchoolQuestionnaireAnswers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerTable::StudentQuestionnaireAnswers => "studentquestionnaireanswers",
            AnswerTable::CurriculumQuestionnaireAnswers => "curriculumquestionnaireanswers",
            AnswerTable::HomeQuestionnaireAnswers => "homequestionnaireanswers",
            AnswerTable::TeacherQuestionnaireAnswers => "teacherquestionnaireanswers",
            AnswerTable::SchoolQuestionnaireAnswers => "schoolquestionnaireanswers",
        }
    }
}

impl std::str::FromStr for AnswerTable {
    type Err = DavinciError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| DavinciError::InvalidInput(format!("Unknown answer table: {}", s)))
    }
}

/// Run an arbitrary query and render it with the query text.
#[instrument(skip(db))]
pub async fn query_database(db: &dyn Database, query: &str) -> Result<String> {
    let result = execute_query(db, query, &[]).await?;
    Ok(format!("Query: {}\nResult:\n{}", query, result.to_lines()))
}

/// Describe the columns of a table.
#[instrument(skip(db))]
pub async fn get_schema_of_given_table(db: &dyn Database, table_name: &str) -> Result<String> {
    let sql = db.dialect().columns_query();
    let result = execute_query(db, sql, &[Value::from(table_name.to_lowercase())]).await?;

    Ok(render_rows(&result, |row| {
        format!("(Column: {}, Data Type: {})", cell(row, 0), cell(row, 1))
    }))
}

/// List the distinct question types of a questionnaire.
#[instrument(skip(db))]
pub async fn get_question_types(db: &dyn Database, table: QuestionnaireTable) -> Result<String> {
    let sql = format!("SELECT DISTINCT type FROM {}", table.as_str());
    let result = execute_query(db, &sql, &[]).await?;

    Ok(render_rows(&result, |row| {
        format!("(Type: {})", unescape_line_breaks(&cell(row, 0)))
    }))
}

/// Build the questions query for the given type filters.
pub fn questions_sql(db: &dyn Database, table: QuestionnaireTable, types: &[String]) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT code, question FROM {}", table.as_str());
    if types.is_empty() {
        return (sql, Vec::new());
    }

    sql.push_str(&format!(
        " WHERE type IN ({})",
        db.dialect().placeholder_list(1, types.len())
    ));
    let params = types
        .iter()
        .map(|t| Value::from(escape_line_breaks(t)))
        .collect();
    (sql, params)
}

/// List questions of a questionnaire, optionally filtered by type.
#[instrument(skip(db))]
pub async fn get_questions(
    db: &dyn Database,
    table: QuestionnaireTable,
    types: &[String],
) -> Result<String> {
    let (sql, params) = questions_sql(db, table, types);
    let result = execute_query(db, &sql, &params).await?;

    Ok(render_rows(&result, |row| {
        format!("(Code: {}, Question: {})", cell(row, 0), cell(row, 1))
    }))
}

/// Build the answers query for the given question codes.
pub fn answers_sql(db: &dyn Database, table: AnswerTable, codes: &[String]) -> Result<(String, Vec<Value>)> {
    require_non_empty(codes, "question code")?;

    let sql = format!(
        "SELECT DISTINCT code, answer FROM {} WHERE code IN ({})",
        table.as_str(),
        db.dialect().placeholder_list(1, codes.len())
    );
    let params = codes.iter().map(|c| Value::from(c.as_str())).collect();
    Ok((sql, params))
}

/// Distinct answers per question code, as indented JSON.
#[instrument(skip(db))]
pub async fn get_answers(db: &dyn Database, table: AnswerTable, codes: &[String]) -> Result<String> {
    let (sql, params) = answers_sql(db, table, codes)?;
    let result = execute_query(db, &sql, &params).await?;

    let mut grouped: Map<String, JsonValue> = Map::new();
    for row in &result.rows {
        let code = cell(row, 0);
        let answer = row.get(1).map(Value::to_json).unwrap_or(JsonValue::Null);

        if let JsonValue::Array(answers) = grouped
            .entry(code)
            .or_insert_with(|| JsonValue::Array(Vec::new()))
        {
            if !answers.contains(&answer) {
                answers.push(answer);
            }
        }
    }

    Ok(serde_json::to_string_pretty(&JsonValue::Object(grouped))?)
}

/// Benchmarks with the score needed to reach them.
#[instrument(skip(db))]
pub async fn get_benchmark_scores(db: &dyn Database) -> Result<String> {
    let result = execute_query(db, "SELECT name, score FROM benchmarks", &[]).await?;
    Ok(render_rows(&result, |row| {
        format!("(Name: {}, Score: {})", cell(row, 0), cell(row, 1))
    }))
}

/// Score metrics with their codes.
#[instrument(skip(db))]
pub async fn get_score_metrics(db: &dyn Database) -> Result<String> {
    let result = execute_query(db, "SELECT name, code FROM studentscoreentries", &[]).await?;
    Ok(render_rows(&result, |row| {
        format!("(Name: {}, Code: {})", cell(row, 0), cell(row, 1))
    }))
}

/// Countries with their codes and ids.
#[instrument(skip(db))]
pub async fn get_countries(db: &dyn Database) -> Result<String> {
    let result = execute_query(db, "SELECT name, code, country_id FROM countries", &[]).await?;
    Ok(render_rows(&result, |row| {
        format!(
            "(Name: {}, Code: {}, Country_Id: {})",
            cell(row, 0),
            cell(row, 1),
            cell(row, 2)
        )
    }))
}

fn render_rows<F>(result: &QueryResult, format_row: F) -> String
where
    F: Fn(&[Value]) -> String,
{
    result
        .rows
        .iter()
        .map(|row| format_row(row.as_slice()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn cell(row: &[Value], index: usize) -> String {
    row.get(index).map(|v| v.to_string()).unwrap_or_default()
}

/// Turn literal `\r\n` escape sequences into real line breaks.
pub fn unescape_line_breaks(value: &str) -> String {
    value.replace(ESCAPED_LINE_BREAK, LINE_BREAK)
}

/// Turn real line breaks back into the stored `\r\n` escape sequence.
pub fn escape_line_breaks(value: &str) -> String {
    value.replace(LINE_BREAK, ESCAPED_LINE_BREAK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;

    fn fixture() -> SqliteDatabase {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute_batch(
            r#"
            CREATE TABLE countries (name TEXT, code TEXT, country_id INTEGER);
            INSERT INTO countries VALUES ('Italy', 'ITA', 17);

            CREATE TABLE benchmarks (name TEXT, score INTEGER);
            INSERT INTO benchmarks VALUES ('Advanced', 625), ('High', 550);

            CREATE TABLE studentscoreentries (name TEXT, code TEXT);
            INSERT INTO studentscoreentries VALUES ('Overall reading', 'ASRREA_avg');

            CREATE TABLE emptytable (id INTEGER);

            CREATE TABLE teacherquestionnaireentries (code TEXT, question TEXT, type TEXT);
            INSERT INTO teacherquestionnaireentries VALUES
                ('ATBG01', 'How long have you been teaching?', 'About You'),
                ('ATBR02', 'How often do you ask students to read aloud?', 'Reading\r\nInstruction'),
                ('ATBR03', 'How often do you ask students to summarize?', 'Reading\r\nInstruction'),
                ('ATBG05', 'What is your gender?', 'Background');

            CREATE TABLE studentquestionnaireanswers (code TEXT, answer TEXT, student_id INTEGER);
            INSERT INTO studentquestionnaireanswers VALUES
                ('ASBG01', 'Girl', 1),
                ('ASBG01', 'Boy', 2),
                ('ASBG01', 'Girl', 3),
                ('ASBG03', 'Always', 1),
                ('ASBG03', 'Sometimes', 2),
                ('ASBG04', 'Größer', 1);
            "#,
        )
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_query_database_renders_query_and_rows() {
        let db = fixture();
        let output = query_database(&db, "SELECT name FROM countries WHERE code = 'ITA'")
            .await
            .unwrap();
        assert_eq!(
            output,
            "Query: SELECT name FROM countries WHERE code = 'ITA'\nResult:\nItaly"
        );
    }

    #[tokio::test]
    async fn test_query_database_propagates_errors() {
        let db = fixture();
        assert!(query_database(&db, "SELECT nope FROM missing").await.is_err());
    }

    #[tokio::test]
    async fn test_schema_of_table() {
        let db = fixture();
        let output = get_schema_of_given_table(&db, "Countries").await.unwrap();
        assert_eq!(
            output,
            "(Column: name, Data Type: TEXT)\n(Column: code, Data Type: TEXT)\n(Column: country_id, Data Type: INTEGER)"
        );
    }

    #[tokio::test]
    async fn test_schema_of_missing_table_is_empty() {
        let db = fixture();
        assert_eq!(get_schema_of_given_table(&db, "no_such_table").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_question_types_unescape_line_breaks() {
        let db = fixture();
        let output = get_question_types(&db, QuestionnaireTable::TeacherQuestionnaireEntries)
            .await
            .unwrap();
        assert!(output.contains("(Type: Reading\r\nInstruction)"));
        assert!(!output.contains("\\r\\n"));
        assert!(output.contains("(Type: About You)"));
    }

    #[tokio::test]
    async fn test_questions_with_escaped_type_filter() {
        let db = fixture();
        let output = get_questions(
            &db,
            QuestionnaireTable::TeacherQuestionnaireEntries,
            &["Reading\r\nInstruction".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(
            output,
            "(Code: ATBR02, Question: How often do you ask students to read aloud?)\n\
             (Code: ATBR03, Question: How often do you ask students to summarize?)"
        );
    }

    #[tokio::test]
    async fn test_questions_without_filter_returns_all() {
        let db = fixture();
        let output = get_questions(&db, QuestionnaireTable::TeacherQuestionnaireEntries, &[])
            .await
            .unwrap();
        assert_eq!(output.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_questions_with_unknown_type_is_empty() {
        let db = fixture();
        let output = get_questions(
            &db,
            QuestionnaireTable::TeacherQuestionnaireEntries,
            &["Nonexistent".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(output, "");
    }

    #[test]
    fn test_single_element_in_clause_has_no_trailing_comma() {
        let db = fixture();
        let (sql, params) = questions_sql(
            &db,
            QuestionnaireTable::StudentQuestionnaireEntries,
            &["About You".to_string()],
        );
        assert!(sql.ends_with("WHERE type IN (?1)"));
        assert!(!sql.contains(",)"));
        assert_eq!(params.len(), 1);

        let (sql, _) = answers_sql(
            &db,
            AnswerTable::StudentQuestionnaireAnswers,
            &["ASBG01".to_string()],
        )
        .unwrap();
        assert!(sql.ends_with("WHERE code IN (?1)"));
    }

    #[tokio::test]
    async fn test_answers_grouped_in_first_seen_order() {
        let db = fixture();
        let output = get_answers(
            &db,
            AnswerTable::StudentQuestionnaireAnswers,
            &["ASBG03".to_string(), "ASBG01".to_string(), "ASBG99".to_string()],
        )
        .await
        .unwrap();

        let parsed: Map<String, JsonValue> = serde_json::from_str(&output).unwrap();
        let keys: Vec<&String> = parsed.keys().collect();
        assert_eq!(keys.len(), 2);
        assert!(parsed.contains_key("ASBG01"));
        assert!(parsed.contains_key("ASBG03"));
        assert_eq!(parsed["ASBG01"], serde_json::json!(["Girl", "Boy"]));
        assert_eq!(parsed["ASBG03"], serde_json::json!(["Always", "Sometimes"]));
    }

    #[tokio::test]
    async fn test_answers_keep_non_ascii_literally() {
        let db = fixture();
        let output = get_answers(
            &db,
            AnswerTable::StudentQuestionnaireAnswers,
            &["ASBG04".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(output, "{\n  \"ASBG04\": [\n    \"Größer\"\n  ]\n}");
    }

    #[tokio::test]
    async fn test_answers_reject_empty_codes() {
        let db = fixture();
        let result = get_answers(&db, AnswerTable::StudentQuestionnaireAnswers, &[]).await;
        assert!(matches!(result, Err(DavinciError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_fixed_lookups() {
        let db = fixture();
        assert_eq!(
            get_benchmark_scores(&db).await.unwrap(),
            "(Name: Advanced, Score: 625)\n(Name: High, Score: 550)"
        );
        assert_eq!(
            get_score_metrics(&db).await.unwrap(),
            "(Name: Overall reading, Code: ASRREA_avg)"
        );
        assert_eq!(
            get_countries(&db).await.unwrap(),
            "(Name: Italy, Code: ITA, Country_Id: 17)"
        );
    }

    #[test]
    fn test_table_parsing() {
        assert_eq!(
            "TeacherQuestionnaireEntries".parse::<QuestionnaireTable>().unwrap(),
            QuestionnaireTable::TeacherQuestionnaireEntries
        );
        assert!("students".parse::<QuestionnaireTable>().is_err());
        assert!("studentquestionnaireentries".parse::<AnswerTable>().is_err());
    }

    #[test]
    fn test_line_break_escaping_round_trip() {
        let raw = "Reading\\r\\nInstruction";
        assert_eq!(unescape_line_breaks(raw), "Reading\r\nInstruction");
        assert_eq!(escape_line_breaks(&unescape_line_breaks(raw)), raw);
    }
}
