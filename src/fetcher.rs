// 🌐 External Data Fetcher - World Bank indicator API client
//
// Responses are a two-element array: [pagination-metadata, observation-list].
// No retries here; callers decide what a failed pair means.

use crate::catalog::CatalogEntry;
use crate::db::Observation;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.worldbank.org/v2";
pub const DEFAULT_PER_PAGE: u32 = 100;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(reqwest::StatusCode),

    /// Upstream answered with an error envelope instead of a page
    #[error("no data: {0}")]
    NoData(String),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Inclusive year range sent as `date=<start>:<end>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        YearRange { start, end }
    }

    fn as_query(&self) -> String {
        format!("{}:{}", self.start, self.end)
    }
}

impl Default for YearRange {
    fn default() -> Self {
        YearRange {
            start: 1960,
            end: 2023,
        }
    }
}

/// Anything that can hand back a country/indicator series
#[async_trait]
pub trait IndicatorSource: Send + Sync {
    async fn fetch_series(
        &self,
        country: &str,
        indicator: &str,
        range: YearRange,
    ) -> Result<Vec<Observation>, FetchError>;
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCountry {
    id: String,
    name: String,
    region: Option<RawRef>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    value: String,
}

/// `page`/`pages` arrive as numbers or numeric strings depending on the endpoint
fn as_u32(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().map(|n| n as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Pull the readable text out of `[{"message":[{"key":..,"value":..}]}]`
fn envelope_message(meta: Option<&Value>) -> String {
    meta.and_then(|m| m.get("message"))
        .and_then(|m| m.as_array())
        .and_then(|msgs| msgs.first())
        .map(|msg| {
            let key = msg.get("key").and_then(Value::as_str).unwrap_or("error");
            let value = msg.get("value").and_then(Value::as_str).unwrap_or("");
            format!("{}: {}", key, value.trim())
        })
        .unwrap_or_else(|| "response carried no observation list".to_string())
}

/// One decoded page: (total pages, items)
fn decode_page<T: for<'de> Deserialize<'de>>(body: &str) -> Result<(u32, Vec<T>), FetchError> {
    let parts: Vec<Value> = serde_json::from_str(body)?;
    if parts.len() < 2 {
        return Err(FetchError::NoData(envelope_message(parts.first())));
    }

    let pages = as_u32(parts[0].get("pages")).unwrap_or(1);
    let items = match &parts[1] {
        // A valid metadata page with a null list means the pair currently has no data
        Value::Null => Vec::new(),
        list => Vec::<T>::deserialize(list)?,
    };
    Ok((pages, items))
}

// ============================================================================
// WORLD BANK CLIENT
// ============================================================================

pub struct WorldBankClient {
    base_url: String,
    per_page: u32,
    http: reqwest::Client,
}

impl WorldBankClient {
    pub fn new(base_url: &str, per_page: u32, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("macrovis/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(WorldBankClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            per_page: per_page.max(1),
            http,
        })
    }

    async fn get_page(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(response.text().await?)
    }

    /// Every real country the API knows about (regional aggregates dropped)
    pub async fn fetch_countries(&self) -> Result<Vec<CatalogEntry>, FetchError> {
        let url = format!("{}/country", self.base_url);
        let mut countries = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("format", "json".to_string()),
                ("per_page", "300".to_string()),
                ("page", page.to_string()),
            ];
            let body = self.get_page(&url, &query).await?;
            let (pages, items) = decode_page::<RawCountry>(&body)?;

            countries.extend(
                items
                    .into_iter()
                    .filter(|c| {
                        c.region
                            .as_ref()
                            .map_or(true, |r| r.value.trim() != "Aggregates")
                    })
                    .map(|c| CatalogEntry {
                        code: c.id,
                        name: c.name,
                    }),
            );

            if page >= pages {
                break;
            }
            page += 1;
        }

        debug!(count = countries.len(), "Fetched country list");
        Ok(countries)
    }
}

#[async_trait]
impl IndicatorSource for WorldBankClient {
    async fn fetch_series(
        &self,
        country: &str,
        indicator: &str,
        range: YearRange,
    ) -> Result<Vec<Observation>, FetchError> {
        let url = format!(
            "{}/country/{}/indicator/{}",
            self.base_url, country, indicator
        );
        let mut observations = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("format", "json".to_string()),
                ("date", range.as_query()),
                ("per_page", self.per_page.to_string()),
                ("page", page.to_string()),
            ];
            let body = self.get_page(&url, &query).await?;
            let (pages, items) = decode_page::<RawObservation>(&body)?;

            for raw in items {
                match raw.date.trim().parse::<i32>() {
                    Ok(year) => observations.push(Observation::new(year, raw.value)),
                    Err(_) => warn!(
                        country,
                        indicator,
                        date = %raw.date,
                        "Skipping observation with non-annual date"
                    ),
                }
            }

            if page >= pages {
                break;
            }
            page += 1;
        }

        debug!(country, indicator, count = observations.len(), "Fetched series");
        Ok(observations)
    }
}
