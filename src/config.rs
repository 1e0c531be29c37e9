use crate::catalog::{default_countries, default_indicators, CatalogEntry};
use crate::fetcher::{YearRange, DEFAULT_BASE_URL, DEFAULT_PER_PAGE};
use crate::reconciliation::{ImportOptions, NullPolicy};
use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WorldBankConfig {
    pub base_url: String,
    pub per_page: u32,
    pub start_year: i32,
    pub end_year: i32,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for WorldBankConfig {
    fn default() -> Self {
        let range = YearRange::default();
        WorldBankConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            per_page: DEFAULT_PER_PAGE,
            start_year: range.start,
            end_year: range.end,
            request_delay_ms: 1500,
            timeout_secs: 30,
        }
    }
}

impl WorldBankConfig {
    pub fn range(&self) -> YearRange {
        YearRange::new(self.start_year, self.end_year)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ImportConfig {
    /// Store null observations instead of dropping them
    pub keep_nulls: bool,
    pub countries: Vec<CatalogEntry>,
    pub indicators: Vec<CatalogEntry>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            keep_nulls: false,
            countries: default_countries(),
            indicators: default_indicators(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: Option<String>,
    pub server: ServerConfig,
    pub worldbank: WorldBankConfig,
    pub import: ImportConfig,
}

impl AppConfig {
    /// Load the config at the default location, or built-in defaults when there is none
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "macrovis", "macrovis")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.database_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("org", "macrovis", "macrovis")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().join("macrovis.db"))
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config = Self::from_yaml(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let wb = &self.worldbank;
        if wb.start_year > wb.end_year {
            bail!(
                "worldbank.start_year ({}) must not be after worldbank.end_year ({})",
                wb.start_year,
                wb.end_year
            );
        }
        if wb.per_page == 0 {
            bail!("worldbank.per_page must be greater than zero");
        }
        Ok(())
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            delay: Duration::from_millis(self.worldbank.request_delay_ms),
            null_policy: NullPolicy::from_keep_nulls(self.import.keep_nulls),
            range: self.worldbank.range(),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
