// 🗄️ Entity Store - SQLite schema, reference rows and fact rows
//
// Countries and indicators are keyed by their external code. Fact rows
// (financial_data) are unique per (country, indicator, year).

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTITIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: i64,
    /// Stable external identifier (ISO alpha-3 style, at most 3 chars)
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub id: i64,
    /// External indicator identifier, e.g. "NY.GDP.MKTP.CD"
    pub code: String,
    pub name: String,
}

/// One (year, value) data point for a country/indicator pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub year: i32,
    pub value: Option<f64>,
}

impl Observation {
    pub fn new(year: i32, value: Option<f64>) -> Self {
        Observation { year, value }
    }
}

/// Sync bookkeeping for one (country, indicator) pair
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSync {
    pub digest: String,
    pub row_count: i64,
    pub run_id: String,
    pub synced_at: DateTime<Utc>,
}

/// Timestamps are stored as fixed-width RFC 3339 so text order matches time order
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

// ============================================================================
// CODE VALIDATION
// ============================================================================

/// Normalize a country code: trimmed, upper-case, 1-3 ASCII alphanumerics
pub fn normalize_country_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() || code.len() > 3 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::validation(
            "country",
            format!("'{code}' is not a 1-3 character alphanumeric code"),
        ));
    }
    Ok(code.to_ascii_uppercase())
}

pub fn validate_indicator_code(code: &str) -> Result<&str> {
    let code = code.trim();
    if code.is_empty() || code.len() > 50 {
        return Err(Error::validation(
            "indicator",
            format!("'{code}' must be between 1 and 50 characters"),
        ));
    }
    Ok(code)
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL lets readers keep a consistent snapshot while the importer rewrites a pair
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS countries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS indicators (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS financial_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            country_id INTEGER NOT NULL REFERENCES countries(id) ON DELETE CASCADE,
            indicator_id INTEGER NOT NULL REFERENCES indicators(id) ON DELETE CASCADE,
            year INTEGER NOT NULL,
            value REAL,
            UNIQUE (country_id, indicator_id, year)
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            token_hash TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS favorite_comparisons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            country1 TEXT NOT NULL,
            country2 TEXT NOT NULL,
            indicator_code TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS last_searches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            country1 TEXT NOT NULL,
            country2 TEXT NOT NULL,
            indicator_code TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS import_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            pairs_total INTEGER NOT NULL DEFAULT 0,
            pairs_updated INTEGER NOT NULL DEFAULT 0,
            pairs_unchanged INTEGER NOT NULL DEFAULT 0,
            pairs_failed INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS series_sync (
            country_id INTEGER NOT NULL REFERENCES countries(id) ON DELETE CASCADE,
            indicator_id INTEGER NOT NULL REFERENCES indicators(id) ON DELETE CASCADE,
            digest TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            synced_at TEXT NOT NULL,
            PRIMARY KEY (country_id, indicator_id)
        );

        CREATE INDEX IF NOT EXISTS idx_financial_data_indicator_year
            ON financial_data(indicator_id, year);
        CREATE INDEX IF NOT EXISTS idx_favorites_user ON favorite_comparisons(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_last_searches_user ON last_searches(user_id, created_at);",
    )?;

    Ok(())
}

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// UNIT OF WORK
// ============================================================================

/// Explicit write scope. Everything done through one unit of work becomes
/// visible at `commit()`; dropping it without committing rolls back.
pub struct UnitOfWork<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl<'conn> UnitOfWork<'conn> {
    pub fn begin(conn: &'conn mut Connection) -> Result<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(UnitOfWork { tx })
    }

    /// Read access inside the unit of work
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Insert or rename a country by its natural key
    pub fn upsert_country(&self, code: &str, name: &str) -> Result<Country> {
        let code = normalize_country_code(code)?;
        let country = self.tx.query_row(
            "INSERT INTO countries (code, name) VALUES (?1, ?2)
             ON CONFLICT(code) DO UPDATE SET name = excluded.name
             RETURNING id, code, name",
            params![code, name],
            |row| {
                Ok(Country {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )?;
        Ok(country)
    }

    /// Insert or rename an indicator by its natural key
    pub fn upsert_indicator(&self, code: &str, name: &str) -> Result<Indicator> {
        let code = validate_indicator_code(code)?;
        let indicator = self.tx.query_row(
            "INSERT INTO indicators (code, name) VALUES (?1, ?2)
             ON CONFLICT(code) DO UPDATE SET name = excluded.name
             RETURNING id, code, name",
            params![code, name],
            |row| {
                Ok(Indicator {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )?;
        Ok(indicator)
    }

    /// Clear every fact row of the pair and write `observations` in their place.
    /// A year repeated inside the batch keeps its last value.
    pub fn replace_series(
        &self,
        country_id: i64,
        indicator_id: i64,
        observations: &[Observation],
    ) -> Result<usize> {
        self.tx.execute(
            "DELETE FROM financial_data WHERE country_id = ?1 AND indicator_id = ?2",
            params![country_id, indicator_id],
        )?;

        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO financial_data (country_id, indicator_id, year, value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(country_id, indicator_id, year) DO UPDATE SET value = excluded.value",
        )?;
        for obs in observations {
            stmt.execute(params![country_id, indicator_id, obs.year, obs.value])?;
        }

        let stored: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM financial_data WHERE country_id = ?1 AND indicator_id = ?2",
            params![country_id, indicator_id],
            |row| row.get(0),
        )?;
        Ok(stored as usize)
    }

    pub fn series_sync(&self, country_id: i64, indicator_id: i64) -> Result<Option<SeriesSync>> {
        let sync = self
            .tx
            .query_row(
                "SELECT digest, row_count, run_id, synced_at FROM series_sync
                 WHERE country_id = ?1 AND indicator_id = ?2",
                params![country_id, indicator_id],
                |row| {
                    let synced_at: String = row.get(3)?;
                    Ok(SeriesSync {
                        digest: row.get(0)?,
                        row_count: row.get(1)?,
                        run_id: row.get(2)?,
                        synced_at: parse_timestamp(&synced_at)?,
                    })
                },
            )
            .optional()?;
        Ok(sync)
    }

    pub fn record_series_sync(
        &self,
        country_id: i64,
        indicator_id: i64,
        sync: &SeriesSync,
    ) -> Result<()> {
        self.tx.execute(
            "INSERT INTO series_sync (country_id, indicator_id, digest, row_count, run_id, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(country_id, indicator_id) DO UPDATE SET
                digest = excluded.digest,
                row_count = excluded.row_count,
                run_id = excluded.run_id,
                synced_at = excluded.synced_at",
            params![
                country_id,
                indicator_id,
                sync.digest,
                sync.row_count,
                sync.run_id,
                timestamp(sync.synced_at),
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// IMPORT RUNS (audit trail)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pairs_total: i64,
    pub pairs_updated: i64,
    pub pairs_unchanged: i64,
    pub pairs_failed: i64,
}

pub fn insert_import_run(conn: &Connection, run_id: &str, started_at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO import_runs (run_id, started_at) VALUES (?1, ?2)",
        params![run_id, timestamp(started_at)],
    )?;
    Ok(())
}

pub fn finish_import_run(conn: &Connection, run: &ImportRun) -> Result<()> {
    conn.execute(
        "UPDATE import_runs
         SET finished_at = ?2, pairs_total = ?3, pairs_updated = ?4,
             pairs_unchanged = ?5, pairs_failed = ?6
         WHERE run_id = ?1",
        params![
            run.run_id,
            run.finished_at.map(timestamp),
            run.pairs_total,
            run.pairs_updated,
            run.pairs_unchanged,
            run.pairs_failed,
        ],
    )?;
    Ok(())
}

pub fn get_import_run(conn: &Connection, run_id: &str) -> Result<Option<ImportRun>> {
    let run = conn
        .query_row(
            "SELECT run_id, started_at, finished_at, pairs_total, pairs_updated,
                    pairs_unchanged, pairs_failed
             FROM import_runs WHERE run_id = ?1",
            [run_id],
            |row| {
                let started_at: String = row.get(1)?;
                let finished_at: Option<String> = row.get(2)?;
                Ok(ImportRun {
                    run_id: row.get(0)?,
                    started_at: parse_timestamp(&started_at)?,
                    finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
                    pairs_total: row.get(3)?,
                    pairs_updated: row.get(4)?,
                    pairs_unchanged: row.get(5)?,
                    pairs_failed: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(run)
}

// ============================================================================
// READS
// ============================================================================

fn country_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Country> {
    Ok(Country {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
    })
}

fn indicator_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Indicator> {
    Ok(Indicator {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
    })
}

pub fn get_country_by_code(conn: &Connection, code: &str) -> Result<Option<Country>> {
    let country = conn
        .query_row(
            "SELECT id, code, name FROM countries WHERE code = ?1",
            [code.trim().to_ascii_uppercase()],
            country_from_row,
        )
        .optional()?;
    Ok(country)
}

pub fn get_indicator_by_code(conn: &Connection, code: &str) -> Result<Option<Indicator>> {
    let indicator = conn
        .query_row(
            "SELECT id, code, name FROM indicators WHERE code = ?1",
            [code.trim()],
            indicator_from_row,
        )
        .optional()?;
    Ok(indicator)
}

pub fn get_indicator_by_id(conn: &Connection, id: i64) -> Result<Option<Indicator>> {
    let indicator = conn
        .query_row(
            "SELECT id, code, name FROM indicators WHERE id = ?1",
            [id],
            indicator_from_row,
        )
        .optional()?;
    Ok(indicator)
}

pub fn list_countries(conn: &Connection) -> Result<Vec<Country>> {
    let mut stmt = conn.prepare("SELECT id, code, name FROM countries ORDER BY name")?;
    let countries = stmt
        .query_map([], country_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(countries)
}

pub fn list_indicators(conn: &Connection) -> Result<Vec<Indicator>> {
    let mut stmt = conn.prepare("SELECT id, code, name FROM indicators ORDER BY name")?;
    let indicators = stmt
        .query_map([], indicator_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(indicators)
}

/// Stored observations of one pair, oldest year first
pub fn get_observations(
    conn: &Connection,
    country_id: i64,
    indicator_id: i64,
) -> Result<Vec<Observation>> {
    let mut stmt = conn.prepare_cached(
        "SELECT year, value FROM financial_data
         WHERE country_id = ?1 AND indicator_id = ?2
         ORDER BY year",
    )?;
    let observations = stmt
        .query_map(params![country_id, indicator_id], |row| {
            Ok(Observation {
                year: row.get(0)?,
                value: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(observations)
}

pub fn count_financial_data(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM financial_data", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = test_db();
        setup_database(&conn).unwrap();
        assert_eq!(count_financial_data(&conn).unwrap(), 0);
    }

    #[test]
    fn test_country_code_normalization() {
        assert_eq!(normalize_country_code(" usa ").unwrap(), "USA");
        assert_eq!(normalize_country_code("1W").unwrap(), "1W");
        assert!(normalize_country_code("").is_err());
        assert!(normalize_country_code("USAA").is_err());
        assert!(normalize_country_code("U-S").is_err());
        assert!(validate_indicator_code(&"X".repeat(51)).is_err());
    }

    #[test]
    fn test_upsert_country_keeps_identity() {
        let mut conn = test_db();

        let uow = UnitOfWork::begin(&mut conn).unwrap();
        let first = uow.upsert_country("usa", "USA").unwrap();
        let second = uow.upsert_country("USA", "United States").unwrap();
        uow.commit().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.code, "USA");

        let stored = get_country_by_code(&conn, "usa").unwrap().unwrap();
        assert_eq!(stored.name, "United States");
        assert_eq!(list_countries(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_replace_series_collapses_duplicate_years() {
        let mut conn = test_db();

        let uow = UnitOfWork::begin(&mut conn).unwrap();
        let country = uow.upsert_country("USA", "United States").unwrap();
        let indicator = uow.upsert_indicator("NY.GDP.MKTP.CD", "GDP").unwrap();
        let stored = uow
            .replace_series(
                country.id,
                indicator.id,
                &[
                    Observation::new(2020, Some(1.0)),
                    Observation::new(2021, Some(2.0)),
                    Observation::new(2020, Some(3.0)),
                ],
            )
            .unwrap();
        uow.commit().unwrap();

        assert_eq!(stored, 2);
        let rows = get_observations(&conn, country.id, indicator.id).unwrap();
        assert_eq!(
            rows,
            vec![Observation::new(2020, Some(3.0)), Observation::new(2021, Some(2.0))]
        );
    }

    #[test]
    fn test_reader_never_sees_half_refreshed_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("macrovis.db");
        let mut writer = open_database(&path).unwrap();
        let reader = open_database(&path).unwrap();

        let uow = UnitOfWork::begin(&mut writer).unwrap();
        let country = uow.upsert_country("USA", "United States").unwrap();
        let indicator = uow.upsert_indicator("NY.GDP.MKTP.CD", "GDP").unwrap();
        uow.replace_series(country.id, indicator.id, &[Observation::new(2020, Some(1.0))])
            .unwrap();
        uow.commit().unwrap();

        let uow = UnitOfWork::begin(&mut writer).unwrap();
        uow.replace_series(country.id, indicator.id, &[Observation::new(2021, Some(2.0))])
            .unwrap();

        // Delete and insert are both done but not committed
        assert_eq!(
            get_observations(&reader, country.id, indicator.id).unwrap(),
            vec![Observation::new(2020, Some(1.0))]
        );

        uow.commit().unwrap();
        assert_eq!(
            get_observations(&reader, country.id, indicator.id).unwrap(),
            vec![Observation::new(2021, Some(2.0))]
        );
    }

    #[test]
    fn test_replace_series_removes_stale_years() {
        let mut conn = test_db();

        let uow = UnitOfWork::begin(&mut conn).unwrap();
        let country = uow.upsert_country("DEU", "Germany").unwrap();
        let indicator = uow.upsert_indicator("SL.UEM.TOTL.ZS", "Unemployment Rate").unwrap();
        uow.replace_series(
            country.id,
            indicator.id,
            &[Observation::new(2019, Some(3.1)), Observation::new(2020, Some(3.8))],
        )
        .unwrap();
        uow.replace_series(country.id, indicator.id, &[Observation::new(2020, Some(3.9))])
            .unwrap();
        uow.commit().unwrap();

        let rows = get_observations(&conn, country.id, indicator.id).unwrap();
        assert_eq!(rows, vec![Observation::new(2020, Some(3.9))]);
    }

    #[test]
    fn test_dropped_unit_of_work_rolls_back() {
        let mut conn = test_db();

        {
            let uow = UnitOfWork::begin(&mut conn).unwrap();
            uow.upsert_country("FRA", "France").unwrap();
            // dropped without commit
        }

        assert!(get_country_by_code(&conn, "FRA").unwrap().is_none());
    }

    #[test]
    fn test_unique_observation_key() {
        let mut conn = test_db();

        let uow = UnitOfWork::begin(&mut conn).unwrap();
        let country = uow.upsert_country("JPN", "Japan").unwrap();
        let indicator = uow.upsert_indicator("FP.CPI.TOTL.ZG", "Inflation Rate").unwrap();
        uow.commit().unwrap();

        conn.execute(
            "INSERT INTO financial_data (country_id, indicator_id, year, value) VALUES (?1, ?2, 2020, 1.0)",
            params![country.id, indicator.id],
        )
        .unwrap();
        let duplicate = conn.execute(
            "INSERT INTO financial_data (country_id, indicator_id, year, value) VALUES (?1, ?2, 2020, 2.0)",
            params![country.id, indicator.id],
        );

        match duplicate {
            Err(rusqlite::Error::SqliteFailure(err, _)) => {
                assert_eq!(err.code, rusqlite::ErrorCode::ConstraintViolation)
            }
            other => panic!("expected constraint violation, got {other:?}"),
        }
    }

    #[test]
    fn test_import_run_round_trip() {
        let conn = test_db();
        let started = Utc::now();
        insert_import_run(&conn, "run-1", started).unwrap();

        let run = ImportRun {
            run_id: "run-1".to_string(),
            started_at: started,
            finished_at: Some(Utc::now()),
            pairs_total: 4,
            pairs_updated: 2,
            pairs_unchanged: 1,
            pairs_failed: 1,
        };
        finish_import_run(&conn, &run).unwrap();

        let stored = get_import_run(&conn, "run-1").unwrap().unwrap();
        assert_eq!(stored.pairs_total, 4);
        assert_eq!(stored.pairs_failed, 1);
        assert!(stored.finished_at.is_some());
        assert!(get_import_run(&conn, "missing").unwrap().is_none());
    }
}
