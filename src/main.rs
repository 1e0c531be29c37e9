// 📊 Macrovis CLI - import, users, export

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};

use macrovis::catalog::{select, unmatched, CatalogEntry};
use macrovis::config::AppConfig;
use macrovis::db::{count_financial_data, open_database};
use macrovis::export::write_series_csv;
use macrovis::log::init_logging;
use macrovis::reconciliation::{Importer, NullPolicy};
use macrovis::{auth, query, WorldBankClient};

#[derive(Parser, Debug)]
#[command(name = "macrovis", version, about = "World Bank indicator importer")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for this crate
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and write a default config if none exists
    Setup,
    /// Fetch indicators from the World Bank and store them
    Import(ImportArgs),
    /// Manage API users
    #[command(subcommand)]
    User(UserCommand),
    /// Write one series as `Date,Value` CSV
    Export {
        country: String,
        /// Indicator code or id
        indicator: String,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Restrict to these country codes (repeatable)
    #[arg(long = "country")]
    countries: Vec<String>,

    /// Restrict to these indicator codes (repeatable)
    #[arg(long = "indicator")]
    indicators: Vec<String>,

    /// Use every country the API lists instead of the configured catalogue
    #[arg(long, conflicts_with = "countries")]
    all_countries: bool,

    /// Store null observations too
    #[arg(long)]
    keep_nulls: bool,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Create a user and print its bearer token
    Add { username: String },
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(),
    }
}

fn open_db(config: &AppConfig) -> Result<rusqlite::Connection> {
    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    open_database(&db_path).with_context(|| format!("Failed to open {}", db_path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Setup => run_setup(&config, cli.config.as_ref()),
        Command::Import(args) => run_import(&config, args).await,
        Command::User(UserCommand::Add { username }) => run_user_add(&config, &username),
        Command::Export {
            country,
            indicator,
            output,
        } => run_export(&config, &country, &indicator, output),
    }
}

fn run_setup(config: &AppConfig, config_path: Option<&PathBuf>) -> Result<()> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => AppConfig::default_config_path()?,
    };
    if path.exists() {
        info!(path = %path.display(), "Config already present");
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, config.to_yaml()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote default config");
    }

    let conn = open_db(config)?;
    info!(
        database = %config.database_path()?.display(),
        rows = count_financial_data(&conn)?,
        "Database ready"
    );
    Ok(())
}

fn select_from_catalogue(
    kind: &str,
    catalogue: &[CatalogEntry],
    codes: &[String],
) -> Vec<CatalogEntry> {
    for code in unmatched(catalogue, codes) {
        warn!(kind, code, "Requested code is not in the configured catalogue, ignoring");
    }
    select(catalogue.to_vec(), codes)
}

async fn run_import(config: &AppConfig, args: ImportArgs) -> Result<()> {
    let wb = &config.worldbank;
    let client = WorldBankClient::new(&wb.base_url, wb.per_page, wb.timeout())?;

    let countries = if args.all_countries {
        client
            .fetch_countries()
            .await
            .context("Failed to list countries")?
    } else {
        select_from_catalogue("country", &config.import.countries, &args.countries)
    };
    let indicators =
        select_from_catalogue("indicator", &config.import.indicators, &args.indicators);

    if countries.is_empty() || indicators.is_empty() {
        warn!("Nothing to import: no matching countries or indicators");
        return Ok(());
    }

    let mut options = config.import_options();
    if args.keep_nulls {
        options.null_policy = NullPolicy::Persist;
    }

    let mut conn = open_db(config)?;
    let report = Importer::new(&client, options)
        .run(&mut conn, &countries, &indicators)
        .await?;

    for pair in report.pairs.iter().filter(|p| p.outcome.is_failed()) {
        warn!(country = %pair.country, indicator = %pair.indicator, "Pair not refreshed");
    }
    println!("{}", report.summary());
    Ok(())
}

fn run_user_add(config: &AppConfig, username: &str) -> Result<()> {
    let conn = open_db(config)?;
    let (user, token) = auth::create_user(&conn, username)?;
    info!(user_id = user.id, username = %user.username, "User created");
    // The token is shown once; only its hash is stored
    println!("{token}");
    Ok(())
}

fn run_export(
    config: &AppConfig,
    country: &str,
    indicator: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let conn = open_db(config)?;
    let series = query::series(&conn, country, indicator)?;

    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_series_csv(file, &series)?;
            info!(path = %path.display(), rows = series.values.len(), "Exported series");
        }
        None => write_series_csv(io::stdout().lock(), &series)?,
    }
    Ok(())
}
