//! Backtest Runner CLI
//!
//! Replays harvested snapshots through the daily decision schedule. The
//! built-in hook queries the point-in-time oracle for each universe symbol
//! at every window and logs the served payload or sentinel; real decision
//! logic plugs in at the same seam.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin backtest_run -- \
//!   --config config.toml \
//!   --db ./marketoracle.db
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use marketoracle_backend::backtest::{BacktestRunner, OracleClient, OracleQuery, SnapshotStore};
use marketoracle_backend::config::AppConfig;
use marketoracle_backend::data::{QuotaManager, ToolRegistry};

#[derive(Debug, Parser)]
#[command(about = "Replay harvested snapshots through the decision schedule")]
struct Args {
    /// Config file path (TOML).
    #[arg(long, env = "MARKETORACLE_CONFIG")]
    config: Option<String>,

    /// Snapshot database path; overrides the configured one.
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("backtest_run=info".parse().unwrap())
                .add_directive("marketoracle_backend=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::from_env()?,
    };
    // This entry point always replays
    config.runtime.mode = "backtest".to_string();

    let db_path = args
        .db
        .unwrap_or_else(|| config.storage.database_path.clone());

    let mut symbols = config.universe.holdings.clone();
    symbols.extend(config.universe.watchlist.clone());
    if symbols.is_empty() {
        anyhow::bail!("Empty universe: configure [universe] holdings or watchlist");
    }

    let quota = Arc::new(QuotaManager::new(config.quota_limits()));
    let registry = Arc::new(ToolRegistry::new(quota)?);
    let store = Arc::new(SnapshotStore::open(&db_path)?);

    let runner = BacktestRunner::new(&config).context("Invalid backtest configuration")?;
    let oracle = Arc::new(OracleClient::new(runner.time_provider(), store, registry));

    let hook_oracle = Arc::clone(&oracle);
    let hook_symbols = symbols.clone();
    runner
        .run(move |window, ts| {
            let oracle = Arc::clone(&hook_oracle);
            let symbols = hook_symbols.clone();
            async move {
                for symbol in &symbols {
                    let payload = oracle.fetch(&OracleQuery::price(symbol)).await?;
                    match serde_json::from_str::<Value>(&payload) {
                        Ok(parsed) if parsed.get("error").is_some() => {
                            warn!(
                                window,
                                at = %ts,
                                symbol = %symbol,
                                error = %parsed["error"],
                                "No data at simulated time"
                            );
                        }
                        _ => {
                            info!(
                                window,
                                at = %ts,
                                symbol = %symbol,
                                bytes = payload.len(),
                                "Snapshot served"
                            );
                        }
                    }
                }
                Ok(())
            }
        })
        .await
        .context("Backtest run failed")?;

    Ok(())
}
