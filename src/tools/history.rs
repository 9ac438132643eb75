//! Historical PIRLS average reading scores (cycles before 2021).

use crate::error::{DavinciError, Result};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const BUNDLED_SCORES: &str = include_str!("../../resources/previous_pirls.csv");
const INDEX_COLUMN: &str = "Country";

/// One country's scores, one per non-index column.
#[derive(Debug, Clone)]
struct CountryScores {
    country: String,
    scores: Vec<Option<f64>>,
}

/// Read-only table of historical scores keyed by country name.
#[derive(Debug, Clone)]
pub struct PirlsHistory {
    columns: Vec<String>,
    rows: Vec<CountryScores>,
}

impl PirlsHistory {
    /// Load the scores table shipped with the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_reader(BUNDLED_SCORES.as_bytes())
    }

    /// Load the bundled table, or `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let history = match path {
            Some(p) => Self::from_reader(std::fs::File::open(p)?)?,
            None => Self::bundled()?,
        };
        info!("Loaded historical PIRLS scores for {} countries", history.rows.len());
        Ok(history)
    }

    /// Parse a semicolon-delimited table with a `Country` column.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let index = headers
            .iter()
            .position(|h| h == INDEX_COLUMN)
            .ok_or_else(|| DavinciError::Config(format!("Scores table has no '{}' column", INDEX_COLUMN)))?;

        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let country = record.get(index).unwrap_or_default().to_string();

            let mut scores = Vec::with_capacity(columns.len());
            for (i, field) in record.iter().enumerate() {
                if i == index {
                    continue;
                }
                scores.push(parse_score(field)?);
            }

            rows.push(CountryScores { country, scores });
        }

        Ok(Self { columns, rows })
    }

    /// Countries known to the table, in table order.
    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.country.as_str())
    }

    /// Scores of the requested countries as indented JSON.
    ///
    /// Unknown names are dropped without error. Scores are rounded to whole
    /// points; missing values are `null`.
    pub fn lookup(&self, countries: &[String]) -> Result<String> {
        let wanted: HashSet<&str> = countries.iter().map(|c| c.trim()).collect();

        let mut result = Map::new();
        for row in self.rows.iter().filter(|r| wanted.contains(r.country.as_str())) {
            let mut scores = Map::new();
            for (column, score) in self.columns.iter().zip(&row.scores) {
                let value = score
                    .map(|s| JsonValue::from(s.round() as i64))
                    .unwrap_or(JsonValue::Null);
                scores.insert(column.clone(), value);
            }
            result.insert(row.country.clone(), JsonValue::Object(scores));
        }

        debug!(
            "Historical scores: {} of {} requested countries found",
            result.len(),
            countries.len()
        );

        Ok(serde_json::to_string_pretty(&JsonValue::Object(result))?)
    }
}

fn parse_score(field: &str) -> Result<Option<f64>> {
    if field.is_empty() {
        return Ok(None);
    }
    field
        .replace(',', ".")
        .parse::<f64>()
        .map(Some)
        .map_err(|_| DavinciError::Config(format!("Invalid score value: {}", field)))
}
