// 🔎 Query/Aggregation Layer - read side over the financial_data table
//
// Three shapes:
//   series  - one (country, indicator) pair, year ascending
//   filter  - row filters plus optional per-(country, year) aggregation
//   compare - requested countries against the all-country peer average
//
// SQL is assembled from fixed fragments; every caller-provided value is bound.

use crate::db::{
    get_country_by_code, get_indicator_by_code, get_indicator_by_id, get_observations, Country,
    Indicator, Observation,
};
use crate::error::{Error, Result};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::str::FromStr;

// ============================================================================
// INDICATOR RESOLUTION
// ============================================================================

/// How an indicator key was matched
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorResolution {
    ByCode(Indicator),
    ById(Indicator),
    NotFound,
}

impl IndicatorResolution {
    pub fn into_indicator(self) -> Option<Indicator> {
        match self {
            IndicatorResolution::ByCode(i) | IndicatorResolution::ById(i) => Some(i),
            IndicatorResolution::NotFound => None,
        }
    }
}

/// Try the key as an external code first, then as an internal numeric id
pub fn resolve_indicator(conn: &Connection, key: &str) -> Result<IndicatorResolution> {
    if let Some(indicator) = get_indicator_by_code(conn, key)? {
        return Ok(IndicatorResolution::ByCode(indicator));
    }
    if let Ok(id) = key.trim().parse::<i64>() {
        if let Some(indicator) = get_indicator_by_id(conn, id)? {
            return Ok(IndicatorResolution::ById(indicator));
        }
    }
    Ok(IndicatorResolution::NotFound)
}

pub fn require_indicator(conn: &Connection, key: &str) -> Result<Indicator> {
    resolve_indicator(conn, key)?
        .into_indicator()
        .ok_or_else(|| Error::not_found("indicator", key))
}

pub fn require_country(conn: &Connection, code: &str) -> Result<Country> {
    get_country_by_code(conn, code)?.ok_or_else(|| Error::not_found("country", code))
}

// ============================================================================
// RESULT SHAPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub country: String,
    pub indicator: String,
    pub values: Vec<Observation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult<T> {
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> From<Vec<T>> for QueryResult<T> {
    fn from(data: Vec<T>) -> Self {
        QueryResult {
            count: data.len(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterRow {
    /// Country display name
    pub country: String,
    pub country_code: String,
    /// Indicator code; absent for aggregated rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator: Option<String>,
    pub year: i32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareRow {
    pub country: String,
    pub country_code: String,
    pub year: i32,
    pub value: Option<f64>,
    /// Mean over all countries for the same indicator and year
    pub average_value: Option<f64>,
}

// ============================================================================
// POINT LOOKUP
// ============================================================================

/// All observations of one pair; an existing pair with no rows is an empty series
pub fn series(conn: &Connection, country_code: &str, indicator_key: &str) -> Result<Series> {
    let country = require_country(conn, country_code)?;
    let indicator = require_indicator(conn, indicator_key)?;
    let values = get_observations(conn, country.id, indicator.id)?;

    if values.is_empty() {
        tracing::warn!(
            country = %country.code,
            indicator = %indicator.code,
            "No data found for pair"
        );
    }

    Ok(Series {
        country: country.code,
        indicator: indicator.code,
        values,
    })
}

// ============================================================================
// QUERY PARAMETERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Aggregation {
    Avg,
    Sum,
    Min,
    Max,
}

impl Aggregation {
    fn sql_function(&self) -> &'static str {
        match self {
            Aggregation::Avg => "AVG",
            Aggregation::Sum => "SUM",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avg" => Ok(Aggregation::Avg),
            "sum" => Ok(Aggregation::Sum),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            other => Err(Error::validation(
                "aggregation",
                format!("unsupported function '{other}' (expected avg, sum, min or max)"),
            )),
        }
    }
}

fn parse_field<T: FromStr>(field: &'static str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::validation(field, format!("'{raw}' is not a valid number")))
}

fn is_country_key(key: &str) -> bool {
    matches!(key, "countries[]" | "countries" | "country")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterParams {
    /// Indicator code or id
    pub indicator: Option<String>,
    /// Country codes; empty means all countries
    pub countries: Vec<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub aggregation: Option<Aggregation>,
}

impl FilterParams {
    /// Build from decoded query-string pairs. Repeated `countries[]` keys
    /// accumulate; empty values mean "not set".
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self> {
        let mut params = FilterParams::default();

        for (key, raw) in pairs {
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "indicator" => params.indicator = Some(value.to_string()),
                k if is_country_key(k) => params.countries.push(value.to_string()),
                "start_year" => params.start_year = Some(parse_field("start_year", value)?),
                "end_year" => params.end_year = Some(parse_field("end_year", value)?),
                "min_value" => params.min_value = Some(parse_field("min_value", value)?),
                "max_value" => params.max_value = Some(parse_field("max_value", value)?),
                "aggregation" if value.eq_ignore_ascii_case("none") => params.aggregation = None,
                "aggregation" => params.aggregation = Some(value.parse()?),
                _ => {}
            }
        }

        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_year, self.end_year) {
            if start > end {
                return Err(Error::validation(
                    "year range",
                    format!("start_year {start} is after end_year {end}"),
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(Error::validation(
                    "value range",
                    format!("min_value {min} is greater than max_value {max}"),
                ));
            }
        }
        for bound in [self.min_value, self.max_value].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(Error::validation("value range", "bounds must be finite"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompareParams {
    pub indicator: String,
    pub year: i32,
    pub countries: Vec<String>,
}

impl CompareParams {
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self> {
        let mut indicator = None;
        let mut year = None;
        let mut countries = Vec::new();

        for (key, raw) in pairs {
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "indicator" => indicator = Some(value.to_string()),
                "year" => year = Some(parse_field("year", value)?),
                k if is_country_key(k) => countries.push(value.to_string()),
                _ => {}
            }
        }

        let params = CompareParams {
            indicator: indicator.ok_or_else(|| Error::validation("indicator", "is required"))?,
            year: year.ok_or_else(|| Error::validation("year", "is required"))?,
            countries,
        };
        if params.countries.is_empty() {
            return Err(Error::validation("countries", "at least one country is required"));
        }
        Ok(params)
    }
}

// ============================================================================
// QUERY BUILDER
// ============================================================================

/// WHERE-clause accumulator: fixed SQL fragments plus bound values
#[derive(Default)]
struct Predicates {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl Predicates {
    fn push(&mut self, clause: &'static str, value: Value) {
        self.clauses.push(clause.to_string());
        self.values.push(value);
    }

    fn push_fixed(&mut self, clause: &'static str) {
        self.clauses.push(clause.to_string());
    }

    /// `column IN (?, ?, ...)` with one placeholder per value
    fn push_in(&mut self, column: &'static str, values: Vec<Value>) {
        if values.is_empty() {
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.clauses.push(format!("{column} IN ({placeholders})"));
        self.values.extend(values);
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn country_ids(conn: &Connection, codes: &[String]) -> Result<Vec<Value>> {
    codes
        .iter()
        .map(|code| require_country(conn, code).map(|c| Value::Integer(c.id)))
        .collect()
}

// ============================================================================
// FILTER / AGGREGATE
// ============================================================================

pub fn filter(conn: &Connection, params: &FilterParams) -> Result<QueryResult<FilterRow>> {
    params.validate()?;

    let mut predicates = Predicates::default();
    predicates.push_fixed("fd.value IS NOT NULL");
    if let Some(key) = &params.indicator {
        let indicator = require_indicator(conn, key)?;
        predicates.push("fd.indicator_id = ?", Value::Integer(indicator.id));
    }
    predicates.push_in("fd.country_id", country_ids(conn, &params.countries)?);
    if let Some(start) = params.start_year {
        predicates.push("fd.year >= ?", Value::Integer(start.into()));
    }
    if let Some(end) = params.end_year {
        predicates.push("fd.year <= ?", Value::Integer(end.into()));
    }
    if let Some(min) = params.min_value {
        predicates.push("fd.value >= ?", Value::Real(min));
    }
    if let Some(max) = params.max_value {
        predicates.push("fd.value <= ?", Value::Real(max));
    }

    let rows = match params.aggregation {
        Some(aggregation) => {
            let sql = format!(
                "SELECT c.name, c.code, fd.year, {func}(fd.value)
                 FROM financial_data fd
                 JOIN countries c ON c.id = fd.country_id
                 {where_sql}
                 GROUP BY c.id, fd.year
                 ORDER BY c.name, fd.year",
                func = aggregation.sql_function(),
                where_sql = predicates.where_sql(),
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(predicates.values.iter()), |row| {
                    Ok(FilterRow {
                        country: row.get(0)?,
                        country_code: row.get(1)?,
                        indicator: None,
                        year: row.get(2)?,
                        value: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
        None => {
            let sql = format!(
                "SELECT c.name, c.code, i.code, fd.year, fd.value
                 FROM financial_data fd
                 JOIN countries c ON c.id = fd.country_id
                 JOIN indicators i ON i.id = fd.indicator_id
                 {where_sql}
                 ORDER BY c.name, fd.year, i.code",
                where_sql = predicates.where_sql(),
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(predicates.values.iter()), |row| {
                    Ok(FilterRow {
                        country: row.get(0)?,
                        country_code: row.get(1)?,
                        indicator: Some(row.get(2)?),
                        year: row.get(3)?,
                        value: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
    };

    Ok(rows.into())
}

// ============================================================================
// PEER COMPARISON
// ============================================================================

/// Each requested country's value next to the average over *all* countries
/// for the same indicator and year, highest value first.
pub fn compare(conn: &Connection, params: &CompareParams) -> Result<QueryResult<CompareRow>> {
    if params.countries.is_empty() {
        return Err(Error::validation("countries", "at least one country is required"));
    }
    let indicator = require_indicator(conn, &params.indicator)?;

    let mut predicates = Predicates::default();
    predicates.push("fd.indicator_id = ?", Value::Integer(indicator.id));
    predicates.push("fd.year = ?", Value::Integer(params.year.into()));
    predicates.push_in("fd.country_id", country_ids(conn, &params.countries)?);

    // The peer CTE binds its own indicator/year ahead of the outer predicates
    let mut values = vec![Value::Integer(indicator.id), Value::Integer(params.year.into())];
    values.extend(predicates.values.iter().cloned());

    let sql = format!(
        "WITH peer AS (
            SELECT AVG(value) AS average_value
            FROM financial_data
            WHERE indicator_id = ? AND year = ?
         )
         SELECT c.name, c.code, fd.year, fd.value, peer.average_value
         FROM financial_data fd
         JOIN countries c ON c.id = fd.country_id
         CROSS JOIN peer
         {where_sql}
         ORDER BY fd.value DESC, c.name",
        where_sql = predicates.where_sql(),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(CompareRow {
                country: row.get(0)?,
                country_code: row.get(1)?,
                year: row.get(2)?,
                value: row.get(3)?,
                average_value: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows.into())
}
