// Macrovis - Core Library
// Indicator import, query layer and user preferences for the CLI and API server

pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod log;
pub mod preferences;
pub mod query;
pub mod reconciliation;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use catalog::CatalogEntry;
pub use config::AppConfig;
pub use db::{open_database, setup_database, Country, Indicator, Observation, UnitOfWork};
pub use error::{Error, Result};
pub use fetcher::{FetchError, IndicatorSource, WorldBankClient, YearRange};
pub use preferences::{ComparisonInput, FavoriteComparison, LastSearch};
pub use query::{
    Aggregation, CompareParams, CompareRow, FilterParams, FilterRow, IndicatorResolution,
    QueryResult, Series,
};
pub use reconciliation::{ImportOptions, ImportReport, Importer, NullPolicy, PairOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
