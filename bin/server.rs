// Macrovis - Web Server
// REST API over the imported indicators, with per-user favorites and searches

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use macrovis::api::{router, AppState};
use macrovis::config::AppConfig;
use macrovis::db::{count_financial_data, open_database};
use macrovis::log::init_logging;

#[derive(Parser, Debug)]
#[command(name = "macrovis-server", version, about = "Macrovis REST API")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind`
    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = open_database(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    info!(
        database = %db_path.display(),
        rows = count_financial_data(&conn)?,
        "Database opened"
    );

    let app = router(AppState::new(conn));

    let addr = cli.bind.unwrap_or(config.server.bind);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Server running on http://{}", addr);
    info!("   API: http://{}/api/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
