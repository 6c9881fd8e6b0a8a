//! Harvest Runner CLI
//!
//! Pulls current provider data for a set of symbols and persists the batch
//! as immutable point-in-time snapshots.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin harvest_run -- \
//!   --config config.toml \
//!   --symbols AAPL,MSFT,NVDA \
//!   --db ./marketoracle.db
//! ```
//!
//! Symbols default to the configured universe (holdings + watchlist).

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use marketoracle_backend::backtest::{Harvester, OracleClient, SnapshotStore, TimeProvider};
use marketoracle_backend::config::AppConfig;
use marketoracle_backend::data::{QuotaManager, ToolRegistry};

#[derive(Debug, Parser)]
#[command(about = "Harvest point-in-time snapshots for a symbol universe")]
struct Args {
    /// Config file path (TOML).
    #[arg(long, env = "MARKETORACLE_CONFIG")]
    config: Option<String>,

    /// Snapshot database path; overrides the configured one.
    #[arg(long)]
    db: Option<String>,

    /// Symbols to harvest; defaults to the configured universe.
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Correlate this batch under an explicit run id.
    #[arg(long)]
    run_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("harvest_run=info".parse().unwrap())
                .add_directive("marketoracle_backend=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::from_env()?,
    };

    let symbols = if args.symbols.is_empty() {
        let mut universe = config.universe.holdings.clone();
        universe.extend(config.universe.watchlist.clone());
        universe
    } else {
        args.symbols.clone()
    };
    if symbols.is_empty() {
        anyhow::bail!("No symbols to harvest: pass --symbols or configure [universe]");
    }

    let db_path = args
        .db
        .unwrap_or_else(|| config.storage.database_path.clone());

    let quota = Arc::new(QuotaManager::new(config.quota_limits()));
    let registry = Arc::new(ToolRegistry::new(Arc::clone(&quota))?);
    let store = Arc::new(SnapshotStore::open(&db_path)?);
    let time = TimeProvider::live();
    let oracle = Arc::new(OracleClient::new(
        time.clone(),
        Arc::clone(&store),
        registry,
    ));
    let harvester = Harvester::new(
        oracle,
        Arc::clone(&store),
        time,
        config.harvest.leakage_markers.clone(),
    );

    let run_id = harvester
        .harvest_symbol_prices(&symbols, args.run_id)
        .await
        .context("Harvest failed")?;

    for (provider, used, limit) in quota.snapshot() {
        let pressure = quota.pressure(&provider).unwrap_or(0.0);
        info!(provider = %provider, used, limit, pressure, "Provider budget");
    }
    info!(run_id = %run_id, db = %db_path, "Harvest complete");
    Ok(())
}
