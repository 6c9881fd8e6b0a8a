//! Application configuration.
//!
//! Loaded from a TOML file (path from `MARKETORACLE_CONFIG`, default
//! `config.toml`). Every section has defaults so a missing file or a partial
//! file still yields a runnable config. API keys come from the environment
//! (`.env` supported), never from the config file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub schedule: ScheduleConfig,
    pub backtest: BacktestConfig,
    pub mcp: McpConfig,
    pub risk: RiskConfig,
    pub universe: UniverseConfig,
    pub storage: StorageConfig,
    pub harvest: HarvestConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// "live" or "backtest".
    pub mode: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: "live".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub windows: WindowsConfig,
}

/// Daily decision window times, "HH:MM" in UTC.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    pub premarket: String,
    /// Minutes after the 09:30 market open for the `open_plus` window.
    pub open_plus_minutes: i64,
    pub noon: String,
    pub reflection: String,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            premarket: "08:00".to_string(),
            open_plus_minutes: 20,
            noon: "12:00".to_string(),
            reflection: "16:30".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// RFC3339 simulated clock start.
    pub clock_start: String,
    /// RFC3339 simulated clock end (inclusive).
    pub clock_end: String,
    pub daily_notional_min: f64,
    pub daily_notional_max: f64,
    /// Wall-clock pacing delay between windows, not simulated time.
    pub simulated_wait_seconds: u64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            clock_start: "2025-01-06T08:00:00Z".to_string(),
            clock_end: "2025-01-10T16:30:00Z".to_string(),
            daily_notional_min: 5000.0,
            daily_notional_max: 10000.0,
            simulated_wait_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Per-provider call budgets, keyed by lowercase provider name.
    pub quotas: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub min_edge_after_cost_pct: f64,
    pub min_win_prob: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_edge_after_cost_pct: 0.0,
            min_win_prob: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub holdings: Vec<String>,
    pub watchlist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./marketoracle.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Case-insensitive substrings that mark a payload as forward-looking
    /// summary content. Matching payloads are dropped before persistence.
    pub leakage_markers: Vec<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            leakage_markers: vec![
                "weekly recap".to_string(),
                "month in review".to_string(),
                "year ahead".to_string(),
                "next week".to_string(),
            ],
        }
    }
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load from the path in `MARKETORACLE_CONFIG` (default `config.toml`).
    /// A missing file yields the built-in defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let path =
            std::env::var("MARKETORACLE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        if Path::new(&path).exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn is_backtest(&self) -> bool {
        self.runtime.mode == "backtest"
    }

    /// Per-provider call budgets, keyed by canonical provider name.
    /// Providers absent here are unlimited.
    pub fn quota_limits(&self) -> HashMap<String, u64> {
        let q = &self.mcp.quotas;
        let get = |key: &str, default: u64| q.get(key).copied().unwrap_or(default);
        HashMap::from([
            ("YAHOO".to_string(), get("yahoo", 100_000)),
            ("STOOQ".to_string(), get("stooq", 100_000)),
            ("TWELVE_DATA".to_string(), get("twelvedata", 800)),
            ("FINNHUB".to_string(), get("finnhub", 50_000)),
            ("FMP".to_string(), get("fmp", 250)),
            ("ALPHA_VANTAGE".to_string(), get("alphavantage", 25)),
            ("FRED".to_string(), get("fred", 10_000)),
            ("GDELT".to_string(), get("gdelt", 1_000)),
            ("SEC_EDGAR".to_string(), get("sec_edgar", 10_000)),
        ])
    }
}
