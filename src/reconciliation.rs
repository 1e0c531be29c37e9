// ⚖️ Reconciler - synchronize stored series with the upstream indicator API
//
// For every country x indicator pair:
//   fetch -> (skip on failure) -> delete + insert inside one unit of work
//
// Readers never observe a pair with zero rows mid-refresh: the delete and the
// inserts commit together. Pairs are processed sequentially with a fixed delay
// between them to stay under the upstream rate limit.

use crate::catalog::CatalogEntry;
use crate::db::{
    finish_import_run, insert_import_run, ImportRun, Observation, SeriesSync, UnitOfWork,
};
use crate::error::Result;
use crate::fetcher::{IndicatorSource, YearRange};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// OPTIONS
// ============================================================================

/// What to do with observations whose value is null
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullPolicy {
    /// Drop them; only observed values are stored
    Skip,
    /// Store them as "known absence" (value NULL)
    Persist,
}

impl NullPolicy {
    pub fn from_keep_nulls(keep_nulls: bool) -> Self {
        if keep_nulls {
            NullPolicy::Persist
        } else {
            NullPolicy::Skip
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            NullPolicy::Skip => "skip",
            NullPolicy::Persist => "persist",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Pause between consecutive pairs (default: 1.5s)
    pub delay: Duration,
    pub null_policy: NullPolicy,
    pub range: YearRange,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            delay: Duration::from_millis(1500),
            null_policy: NullPolicy::Skip,
            range: YearRange::default(),
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PairOutcome {
    /// Rows were rewritten
    Updated { rows: usize },
    /// Upstream returned the same batch as last time; nothing written
    Unchanged { rows: usize },
    /// Fetch failed; stored rows for the pair were left alone
    Failed { reason: String },
}

impl PairOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, PairOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub country: String,
    pub indicator: String,
    pub outcome: PairOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub run_id: String,
    pub pairs: Vec<PairReport>,
}

impl ImportReport {
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Updated { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Unchanged { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(PairOutcome::is_failed)
    }

    pub fn outcome(&self, country: &str, indicator: &str) -> Option<&PairOutcome> {
        self.pairs
            .iter()
            .find(|p| p.country == country && p.indicator == indicator)
            .map(|p| &p.outcome)
    }

    fn count(&self, pred: impl Fn(&PairOutcome) -> bool) -> usize {
        self.pairs.iter().filter(|p| pred(&p.outcome)).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Import {}: {} pairs, {} updated, {} unchanged, {} failed",
            self.run_id,
            self.pairs.len(),
            self.updated(),
            self.unchanged(),
            self.failed()
        )
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Apply the null policy and sort by year so equal upstream batches compare equal
pub fn normalize(observations: Vec<Observation>, policy: NullPolicy) -> Vec<Observation> {
    let mut kept: Vec<Observation> = observations
        .into_iter()
        .filter(|o| policy == NullPolicy::Persist || o.value.is_some())
        .collect();
    // Stable sort: a repeated year keeps upstream order, so the last one still wins on insert
    kept.sort_by_key(|o| o.year);
    kept
}

/// SHA-256 over the normalized batch (policy included)
pub fn batch_digest(observations: &[Observation], policy: NullPolicy) -> String {
    let mut hasher = Sha256::new();
    hasher.update(policy.as_str());
    for obs in observations {
        match obs.value {
            Some(v) => hasher.update(format!(";{}={}", obs.year, v.to_bits())),
            None => hasher.update(format!(";{}=null", obs.year)),
        }
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// IMPORTER
// ============================================================================

pub struct Importer<'a, S: IndicatorSource + ?Sized> {
    source: &'a S,
    options: ImportOptions,
}

impl<'a, S: IndicatorSource + ?Sized> Importer<'a, S> {
    pub fn new(source: &'a S, options: ImportOptions) -> Self {
        Importer { source, options }
    }

    /// Upsert the reference rows, then refresh every pair.
    ///
    /// Fetch failures are recorded per pair and the batch moves on. Store
    /// failures abort the run.
    pub async fn run(
        &self,
        conn: &mut Connection,
        countries: &[CatalogEntry],
        indicators: &[CatalogEntry],
    ) -> Result<ImportReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        insert_import_run(conn, &run_id, started_at)?;
        info!(
            %run_id,
            countries = countries.len(),
            indicators = indicators.len(),
            "Starting import"
        );

        // Reference rows first so fact rows never point at a missing country/indicator
        let uow = UnitOfWork::begin(conn)?;
        let mut country_rows = Vec::with_capacity(countries.len());
        for entry in countries {
            country_rows.push(uow.upsert_country(&entry.code, &entry.name)?);
            debug!(code = %entry.code, name = %entry.name, "Added/updated country");
        }
        let mut indicator_rows = Vec::with_capacity(indicators.len());
        for entry in indicators {
            indicator_rows.push(uow.upsert_indicator(&entry.code, &entry.name)?);
            debug!(code = %entry.code, name = %entry.name, "Added/updated indicator");
        }
        uow.commit()?;

        let mut pairs = Vec::with_capacity(country_rows.len() * indicator_rows.len());
        for country in &country_rows {
            for indicator in &indicator_rows {
                if !pairs.is_empty() && !self.options.delay.is_zero() {
                    tokio::time::sleep(self.options.delay).await;
                }

                let outcome = self
                    .refresh_pair(conn, &run_id, country.id, &country.code, indicator.id, &indicator.code)
                    .await?;
                pairs.push(PairReport {
                    country: country.code.clone(),
                    indicator: indicator.code.clone(),
                    outcome,
                });
            }
        }

        let report = ImportReport { run_id, pairs };
        finish_import_run(
            conn,
            &ImportRun {
                run_id: report.run_id.clone(),
                started_at,
                finished_at: Some(Utc::now()),
                pairs_total: report.pairs.len() as i64,
                pairs_updated: report.updated() as i64,
                pairs_unchanged: report.unchanged() as i64,
                pairs_failed: report.failed() as i64,
            },
        )?;
        info!("{}", report.summary());

        Ok(report)
    }

    async fn refresh_pair(
        &self,
        conn: &mut Connection,
        run_id: &str,
        country_id: i64,
        country_code: &str,
        indicator_id: i64,
        indicator_code: &str,
    ) -> Result<PairOutcome> {
        let fetched = match self
            .source
            .fetch_series(country_code, indicator_code, self.options.range)
            .await
        {
            Ok(observations) => observations,
            Err(e) => {
                warn!(
                    country = country_code,
                    indicator = indicator_code,
                    error = %e,
                    "Error fetching data, skipping pair"
                );
                return Ok(PairOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let policy = self.options.null_policy;
        let batch = normalize(fetched, policy);
        let digest = batch_digest(&batch, policy);

        let uow = UnitOfWork::begin(conn)?;
        if let Some(previous) = uow.series_sync(country_id, indicator_id)? {
            if previous.digest == digest {
                debug!(
                    country = country_code,
                    indicator = indicator_code,
                    "Upstream batch unchanged"
                );
                return Ok(PairOutcome::Unchanged {
                    rows: previous.row_count as usize,
                });
            }
        }

        let rows = uow.replace_series(country_id, indicator_id, &batch)?;
        uow.record_series_sync(
            country_id,
            indicator_id,
            &SeriesSync {
                digest,
                row_count: rows as i64,
                run_id: run_id.to_string(),
                synced_at: Utc::now(),
            },
        )?;
        uow.commit()?;

        info!(
            country = country_code,
            indicator = indicator_code,
            rows,
            "Updated data"
        );
        Ok(PairOutcome::Updated { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        count_financial_data, get_country_by_code, get_import_run, get_indicator_by_code,
        get_observations, setup_database,
    };
    use crate::fetcher::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory source: a canned batch per pair, missing pairs fail
    #[derive(Default)]
    struct StubSource {
        series: Mutex<HashMap<(String, String), Vec<Observation>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl StubSource {
        fn with(self, country: &str, indicator: &str, observations: Vec<Observation>) -> Self {
            self.set(country, indicator, observations);
            self
        }

        fn set(&self, country: &str, indicator: &str, observations: Vec<Observation>) {
            self.series
                .lock()
                .unwrap()
                .insert((country.to_string(), indicator.to_string()), observations);
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl IndicatorSource for StubSource {
        async fn fetch_series(
            &self,
            country: &str,
            indicator: &str,
            _range: YearRange,
        ) -> std::result::Result<Vec<Observation>, FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push((country.to_string(), indicator.to_string()));
            self.series
                .lock()
                .unwrap()
                .get(&(country.to_string(), indicator.to_string()))
                .cloned()
                .ok_or_else(|| FetchError::NoData("stubbed failure".to_string()))
        }
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn options(null_policy: NullPolicy) -> ImportOptions {
        ImportOptions {
            delay: Duration::ZERO,
            null_policy,
            range: YearRange::default(),
        }
    }

    fn entries(pairs: &[(&str, &str)]) -> Vec<CatalogEntry> {
        pairs.iter().map(|(c, n)| CatalogEntry::new(c, n)).collect()
    }

    fn stored(conn: &Connection, country: &str, indicator: &str) -> Vec<Observation> {
        let country = get_country_by_code(conn, country).unwrap().unwrap();
        let indicator = get_indicator_by_code(conn, indicator).unwrap().unwrap();
        get_observations(conn, country.id, indicator.id).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_drops_null_values() {
        let mut conn = test_db();
        let source = StubSource::default().with(
            "USA",
            "GDP",
            vec![Observation::new(2020, Some(21.4)), Observation::new(2021, None)],
        );

        let report = Importer::new(&source, options(NullPolicy::Skip))
            .run(&mut conn, &entries(&[("USA", "United States")]), &entries(&[("GDP", "GDP")]))
            .await
            .unwrap();

        assert_eq!(report.outcome("USA", "GDP"), Some(&PairOutcome::Updated { rows: 1 }));
        assert_eq!(stored(&conn, "USA", "GDP"), vec![Observation::new(2020, Some(21.4))]);
    }

    #[tokio::test]
    async fn test_persist_policy_keeps_known_absence() {
        let mut conn = test_db();
        let source = StubSource::default().with(
            "USA",
            "GDP",
            vec![Observation::new(2021, None), Observation::new(2020, Some(21.4))],
        );

        Importer::new(&source, options(NullPolicy::Persist))
            .run(&mut conn, &entries(&[("USA", "United States")]), &entries(&[("GDP", "GDP")]))
            .await
            .unwrap();

        assert_eq!(
            stored(&conn, "USA", "GDP"),
            vec![Observation::new(2020, Some(21.4)), Observation::new(2021, None)]
        );
    }

    #[tokio::test]
    async fn test_failed_pair_does_not_stop_batch() {
        let mut conn = test_db();
        // (DEU, GDP) has no stub and fails
        let source = StubSource::default()
            .with("USA", "GDP", vec![Observation::new(2020, Some(1.0))])
            .with("USA", "CPI", vec![Observation::new(2020, Some(2.0))])
            .with("DEU", "CPI", vec![Observation::new(2020, Some(3.0))]);

        let report = Importer::new(&source, options(NullPolicy::Skip))
            .run(
                &mut conn,
                &entries(&[("USA", "United States"), ("DEU", "Germany")]),
                &entries(&[("GDP", "GDP"), ("CPI", "Inflation")]),
            )
            .await
            .unwrap();

        assert_eq!(source.call_count(), 4);
        assert_eq!(report.updated(), 3);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.outcome("DEU", "GDP"),
            Some(PairOutcome::Failed { .. })
        ));
        assert_eq!(stored(&conn, "DEU", "CPI"), vec![Observation::new(2020, Some(3.0))]);
        assert!(stored(&conn, "DEU", "GDP").is_empty());

        let run = get_import_run(&conn, &report.run_id).unwrap().unwrap();
        assert_eq!(run.pairs_total, 4);
        assert_eq!(run.pairs_failed, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_rows() {
        let mut conn = test_db();
        let source = StubSource::default().with("USA", "GDP", vec![Observation::new(2020, Some(1.0))]);
        let countries = entries(&[("USA", "United States")]);
        let indicators = entries(&[("GDP", "GDP")]);
        let importer = Importer::new(&source, options(NullPolicy::Skip));

        importer.run(&mut conn, &countries, &indicators).await.unwrap();
        source.series.lock().unwrap().clear();
        let report = importer.run(&mut conn, &countries, &indicators).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(stored(&conn, "USA", "GDP"), vec![Observation::new(2020, Some(1.0))]);
    }

    #[tokio::test]
    async fn test_withdrawn_upstream_data_clears_pair() {
        let mut conn = test_db();
        let source = StubSource::default().with("USA", "GDP", vec![Observation::new(2020, Some(1.0))]);
        let countries = entries(&[("USA", "United States")]);
        let indicators = entries(&[("GDP", "GDP")]);
        let importer = Importer::new(&source, options(NullPolicy::Skip));

        importer.run(&mut conn, &countries, &indicators).await.unwrap();
        source.set("USA", "GDP", vec![]);
        let report = importer.run(&mut conn, &countries, &indicators).await.unwrap();

        assert_eq!(report.failed(), 0);
        assert_eq!(report.outcome("USA", "GDP"), Some(&PairOutcome::Updated { rows: 0 }));
        assert!(stored(&conn, "USA", "GDP").is_empty());
    }

    #[tokio::test]
    async fn test_reimport_same_data_is_idempotent() {
        let mut conn = test_db();
        let batch = vec![
            Observation::new(2021, Some(2.5)),
            Observation::new(2020, Some(1.5)),
            Observation::new(2019, None),
        ];
        let source = StubSource::default().with("USA", "GDP", batch);
        let countries = entries(&[("USA", "United States")]);
        let indicators = entries(&[("GDP", "GDP")]);
        let importer = Importer::new(&source, options(NullPolicy::Skip));

        let first = importer.run(&mut conn, &countries, &indicators).await.unwrap();
        let rows_after_first = stored(&conn, "USA", "GDP");
        let second = importer.run(&mut conn, &countries, &indicators).await.unwrap();

        assert_eq!(first.updated(), 1);
        assert_eq!(second.unchanged(), 1);
        assert_eq!(second.outcome("USA", "GDP"), Some(&PairOutcome::Unchanged { rows: 2 }));
        assert_eq!(stored(&conn, "USA", "GDP"), rows_after_first);
        assert_eq!(count_financial_data(&conn).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_changed_upstream_rewrites_pair() {
        let mut conn = test_db();
        let source = StubSource::default().with(
            "USA",
            "GDP",
            vec![Observation::new(2019, Some(1.0)), Observation::new(2020, Some(2.0))],
        );
        let countries = entries(&[("USA", "United States")]);
        let indicators = entries(&[("GDP", "GDP")]);
        let importer = Importer::new(&source, options(NullPolicy::Skip));

        importer.run(&mut conn, &countries, &indicators).await.unwrap();
        source.set("USA", "GDP", vec![Observation::new(2020, Some(2.2))]);
        let report = importer.run(&mut conn, &countries, &indicators).await.unwrap();

        assert_eq!(report.outcome("USA", "GDP"), Some(&PairOutcome::Updated { rows: 1 }));
        assert_eq!(stored(&conn, "USA", "GDP"), vec![Observation::new(2020, Some(2.2))]);
    }

    #[tokio::test]
    async fn test_duplicate_years_keep_one_row() {
        let mut conn = test_db();
        let source = StubSource::default().with(
            "USA",
            "GDP",
            vec![Observation::new(2020, Some(1.0)), Observation::new(2020, Some(9.0))],
        );

        Importer::new(&source, options(NullPolicy::Skip))
            .run(&mut conn, &entries(&[("USA", "United States")]), &entries(&[("GDP", "GDP")]))
            .await
            .unwrap();

        assert_eq!(stored(&conn, "USA", "GDP"), vec![Observation::new(2020, Some(9.0))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_pairs() {
        let mut conn = test_db();
        let source = StubSource::default()
            .with("USA", "GDP", vec![Observation::new(2020, Some(1.0))])
            .with("USA", "CPI", vec![Observation::new(2020, Some(2.0))]);
        let opts = ImportOptions {
            delay: Duration::from_millis(1500),
            ..options(NullPolicy::Skip)
        };

        let started = tokio::time::Instant::now();
        Importer::new(&source, opts)
            .run(
                &mut conn,
                &entries(&[("USA", "United States")]),
                &entries(&[("GDP", "GDP"), ("CPI", "Inflation")]),
            )
            .await
            .unwrap();

        // One pause between two pairs, none after the last
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3000), "elapsed {elapsed:?}");
    }

    #[test]
    fn test_digest_depends_on_policy_and_values() {
        let batch = vec![Observation::new(2020, Some(1.0))];
        assert_eq!(
            batch_digest(&batch, NullPolicy::Skip),
            batch_digest(&batch.clone(), NullPolicy::Skip)
        );
        assert_ne!(
            batch_digest(&batch, NullPolicy::Skip),
            batch_digest(&batch, NullPolicy::Persist)
        );
        assert_ne!(
            batch_digest(&batch, NullPolicy::Skip),
            batch_digest(&[Observation::new(2020, Some(1.5))], NullPolicy::Skip)
        );
        assert_eq!(batch_digest(&batch, NullPolicy::Skip).len(), 64);
    }
}
