//! UNESCO UIS indicator data.

use crate::config::IndicatorSettings;
use crate::error::{DavinciError, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// Indicators the crew may request.
///
/// Serialized as the canonical API code; parsed case-insensitively everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorCode {
    Code10,
    Code13,
    Code20162,
    Code21506,
    CompletionRatePrimary,
    ReadPrimary,
    PrepFutureReading,
    PrimaryExpenditureGdp,
    GdpCurrentUsd,
    GdpPerCapitaCurrentUsd,
    GdpGrowth,
}

impl IndicatorCode {
    pub const ALL: [IndicatorCode; 11] = [
        IndicatorCode::Code10,
        IndicatorCode::Code13,
        IndicatorCode::Code20162,
        IndicatorCode::Code21506,
        IndicatorCode::CompletionRatePrimary,
        IndicatorCode::ReadPrimary,
        IndicatorCode::PrepFutureReading,
        IndicatorCode::PrimaryExpenditureGdp,
        IndicatorCode::GdpCurrentUsd,
        IndicatorCode::GdpPerCapitaCurrentUsd,
        IndicatorCode::GdpGrowth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorCode::Code10 => "10",
            IndicatorCode::Code13 => "13",
            IndicatorCode::Code20162 => "20162",
            IndicatorCode::Code21506 => "21506",
            IndicatorCode::CompletionRatePrimary => "CR.1",
            IndicatorCode::ReadPrimary => "READ.PRIMARY",
            IndicatorCode::PrepFutureReading => "PREPFUTURE.1.READ",
            IndicatorCode::PrimaryExpenditureGdp => "XGDP.1.FSGOV",
            IndicatorCode::GdpCurrentUsd => "NY.GDP.MKTP.CD",
            IndicatorCode::GdpPerCapitaCurrentUsd => "NY.GDP.PCAP.CD",
            IndicatorCode::GdpGrowth => "NY.GDP.MKTP.KD.ZG",
        }
    }
}

impl std::str::FromStr for IndicatorCode {
    type Err = DavinciError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DavinciError::InvalidInput(format!("Unknown indicator code: {}", s)))
    }
}

impl Serialize for IndicatorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IndicatorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for IndicatorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one indicator request.
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorOutcome {
    /// The API answered with at least one record.
    Data(serde_json::Value),
    /// The API answered successfully but has no records for the request.
    NoData,
    /// The API answered with a non-success status.
    Failed { status: u16 },
}

impl IndicatorOutcome {
    /// Text handed back to the agent.
    ///
    /// A failed request renders as the empty string; an empty answer renders
    /// as an explicit message so the two cases stay distinguishable.
    pub fn render(&self, countries: &[String], year: i32) -> Result<String> {
        match self {
            IndicatorOutcome::Data(body) => Ok(serde_json::to_string_pretty(body)?),
            IndicatorOutcome::NoData => Ok(format!(
                "No indicator data available for {} in {}.",
                countries.join(", "),
                year
            )),
            IndicatorOutcome::Failed { .. } => Ok(String::new()),
        }
    }
}

/// Client for the UIS indicator data endpoint.
pub struct IndicatorClient {
    http: reqwest::Client,
    base_url: Url,
}

impl IndicatorClient {
    pub fn new(settings: &IndicatorSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| DavinciError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| DavinciError::Config(format!("Invalid indicator API URL: {}", e)))?;

        Ok(Self { http, base_url })
    }

    /// Build the request URL with repeated `indicator` and `geoUnit` parameters.
    pub fn request_url(&self, indicators: &[IndicatorCode], countries: &[String], year: i32) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            for indicator in indicators {
                query.append_pair("indicator", indicator.as_str());
            }
            query.append_pair("indicatorMetadata", "false");
            for country in countries {
                query.append_pair("geoUnit", country);
            }
            query.append_pair("geoUnitType", "NATIONAL");
            query.append_pair("start", &year.to_string());
            query.append_pair("end", &year.to_string());
        }
        url
    }

    /// Fetch indicator data for the given countries and year.
    #[instrument(skip(self))]
    pub async fn fetch(
        &self,
        indicators: &[IndicatorCode],
        countries: &[String],
        year: i32,
    ) -> Result<IndicatorOutcome> {
        if indicators.is_empty() {
            return Err(DavinciError::InvalidInput(
                "At least one indicator code is required".to_string(),
            ));
        }

        let url = self.request_url(indicators, countries, year);
        debug!("Fetching indicators from {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            warn!("Indicator API returned status {}", status);
            return Ok(IndicatorOutcome::Failed {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DavinciError::Indicator(format!("Invalid response body: {}", e)))?;

        let has_records = body
            .get("records")
            .and_then(|r| r.as_array())
            .map(|r| !r.is_empty())
            .unwrap_or(true);

        if has_records {
            Ok(IndicatorOutcome::Data(body))
        } else {
            Ok(IndicatorOutcome::NoData)
        }
    }

    /// Fetch and render for the agent.
    pub async fn get_indicators_data(
        &self,
        indicators: &[IndicatorCode],
        countries: &[String],
        year: i32,
    ) -> Result<String> {
        self.fetch(indicators, countries, year)
            .await?
            .render(countries, year)
    }
}
