//! Market data provider tools.
//!
//! Each tool is a named capability (endpoint) with its own request shape,
//! dispatched explicitly by name through [`ToolRegistry::call`]. Only
//! `get_price` has a multi-provider fallback chain; every other tool maps
//! one-to-one to a single provider. All outbound calls are gated by the
//! injected [`QuotaManager`]; an exhausted chain returns the
//! `"ERROR: <PROVIDER> QUOTA_EXCEEDED"` sentinel as payload content, never
//! as an error.
//!
//! Parameter contracts are exact: a missing required parameter is an error,
//! not a degraded no-argument call.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::data::quota::QuotaManager;

/// Request parameters for a tool call, as a JSON object.
pub type ToolParams = Map<String, Value>;

const YAHOO_QUOTE_URL: &str = "https://query1.finance.yahoo.com/v7/finance/quote";
const STOOQ_QUOTE_URL: &str = "https://stooq.com/q/l/";
const TWELVE_DATA_QUOTE_URL: &str = "https://api.twelvedata.com/quote";
const TWELVE_DATA_SERIES_URL: &str = "https://api.twelvedata.com/time_series";
const FINNHUB_QUOTE_URL: &str = "https://finnhub.io/api/v1/quote";
const FMP_QUOTE_URL: &str = "https://financialmodelingprep.com/api/v3/quote";
const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";
const FRED_SERIES_URL: &str = "https://api.stlouisfed.org/fred/series";
const GDELT_DOC_URL: &str = "https://api.gdeltproject.org/api/v2/doc/doc";
const SEC_SUBMISSIONS_BASE: &str = "https://data.sec.gov/submissions";

/// Endpoint names this registry serves, in registration order.
pub const TOOL_NAMES: [&str; 8] = [
    "get_price",
    "finnhub_quote",
    "fmp_quote",
    "twelve_data_series",
    "alpha_vantage_global_quote",
    "fred_series",
    "gdelt_search",
    "sec_edgar_submissions",
];

/// Explicit registry of market data tools sharing one HTTP client and one
/// quota manager.
pub struct ToolRegistry {
    http: Client,
    quota: Arc<QuotaManager>,
}

impl ToolRegistry {
    pub fn new(quota: Arc<QuotaManager>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build provider HTTP client")?;
        Ok(Self { http, quota })
    }

    /// Whether `endpoint` names a registered tool.
    pub fn contains(&self, endpoint: &str) -> bool {
        TOOL_NAMES.contains(&endpoint)
    }

    /// Dispatch a tool call by endpoint name.
    ///
    /// Quota exhaustion is returned as a sentinel payload (`Ok`); transport
    /// failures and parameter contract violations are `Err` and propagate to
    /// the caller untouched — retry policy lives above this layer.
    pub async fn call(&self, endpoint: &str, params: &ToolParams) -> Result<String> {
        match endpoint {
            "get_price" => {
                let symbol = require_str(params, "symbol", endpoint)?;
                self.get_price(symbol).await
            }
            "finnhub_quote" => {
                let symbol = require_str(params, "symbol", endpoint)?;
                self.finnhub_quote(symbol).await
            }
            "fmp_quote" => {
                let symbol = require_str(params, "symbol", endpoint)?;
                self.fmp_quote(symbol).await
            }
            "twelve_data_series" => {
                let symbol = require_str(params, "symbol", endpoint)?;
                let interval = optional_str(params, "interval", "1min");
                self.twelve_data_series(symbol, &interval).await
            }
            "alpha_vantage_global_quote" => {
                let symbol = require_str(params, "symbol", endpoint)?;
                self.alpha_vantage_global_quote(symbol).await
            }
            "fred_series" => {
                let series_id = optional_str(params, "series_id", "GNP");
                self.fred_series(&series_id).await
            }
            "gdelt_search" => {
                let query = optional_str(params, "query", "AAPL");
                self.gdelt_search(&query).await
            }
            "sec_edgar_submissions" => {
                let cik = require_str(params, "cik", endpoint)?;
                self.sec_edgar_submissions(cik).await
            }
            other => bail!("Tool not registered: {}", other),
        }
    }

    /// Primary price capability: providers tried in fixed priority order,
    /// each gated by quota. The first provider with remaining budget is
    /// invoked; an exhausted chain yields the sentinel naming the last
    /// provider attempted.
    pub async fn get_price(&self, symbol: &str) -> Result<String> {
        if self.consume("YAHOO") {
            return self
                .get(YAHOO_QUOTE_URL, &[("symbols", symbol)])
                .await
                .context("YAHOO get_price failed");
        }
        if self.consume("STOOQ") {
            let lowered = symbol.to_lowercase();
            return self
                .get(
                    STOOQ_QUOTE_URL,
                    &[("s", lowered.as_str()), ("f", "sd2t2ohlcv"), ("e", "json")],
                )
                .await
                .context("STOOQ get_price failed");
        }
        if self.consume("TWELVE_DATA") {
            let key = env_key("TWELVE_DATA_API_KEY");
            return self
                .get(
                    TWELVE_DATA_QUOTE_URL,
                    &[("symbol", symbol), ("apikey", key.as_str())],
                )
                .await
                .context("TWELVE_DATA get_price failed");
        }
        if self.consume("FINNHUB") {
            let key = env_key("FINNHUB_API_KEY");
            return self
                .get(
                    FINNHUB_QUOTE_URL,
                    &[("symbol", symbol), ("token", key.as_str())],
                )
                .await
                .context("FINNHUB get_price failed");
        }
        Ok(quota_error("FINNHUB"))
    }

    pub async fn finnhub_quote(&self, symbol: &str) -> Result<String> {
        if !self.consume("FINNHUB") {
            return Ok(quota_error("FINNHUB"));
        }
        let key = env_key("FINNHUB_API_KEY");
        self.get(
            FINNHUB_QUOTE_URL,
            &[("symbol", symbol), ("token", key.as_str())],
        )
        .await
        .context("FINNHUB quote failed")
    }

    pub async fn fmp_quote(&self, symbol: &str) -> Result<String> {
        if !self.consume("FMP") {
            return Ok(quota_error("FMP"));
        }
        let key = env_key("FMP_API_KEY");
        let url = format!("{}/{}", FMP_QUOTE_URL, symbol);
        self.get(&url, &[("apikey", key.as_str())])
            .await
            .context("FMP quote failed")
    }

    pub async fn twelve_data_series(&self, symbol: &str, interval: &str) -> Result<String> {
        if !self.consume("TWELVE_DATA") {
            return Ok(quota_error("TWELVE_DATA"));
        }
        let key = env_key("TWELVE_DATA_API_KEY");
        self.get(
            TWELVE_DATA_SERIES_URL,
            &[
                ("symbol", symbol),
                ("interval", interval),
                ("apikey", key.as_str()),
            ],
        )
        .await
        .context("TWELVE_DATA series failed")
    }

    pub async fn alpha_vantage_global_quote(&self, symbol: &str) -> Result<String> {
        if !self.consume("ALPHA_VANTAGE") {
            return Ok(quota_error("ALPHA_VANTAGE"));
        }
        let key = env_key("ALPHA_VANTAGE_API_KEY");
        self.get(
            ALPHA_VANTAGE_URL,
            &[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", key.as_str()),
            ],
        )
        .await
        .context("ALPHA_VANTAGE global quote failed")
    }

    pub async fn fred_series(&self, series_id: &str) -> Result<String> {
        if !self.consume("FRED") {
            return Ok(quota_error("FRED"));
        }
        let key = env_key("FRED_API_KEY");
        self.get(
            FRED_SERIES_URL,
            &[
                ("series_id", series_id),
                ("api_key", key.as_str()),
                ("file_type", "json"),
            ],
        )
        .await
        .context("FRED series failed")
    }

    pub async fn gdelt_search(&self, query: &str) -> Result<String> {
        if !self.consume("GDELT") {
            return Ok(quota_error("GDELT"));
        }
        self.get(
            GDELT_DOC_URL,
            &[
                ("query", query),
                ("mode", "ArtList"),
                ("format", "json"),
                ("maxrecords", "10"),
            ],
        )
        .await
        .context("GDELT search failed")
    }

    pub async fn sec_edgar_submissions(&self, cik: &str) -> Result<String> {
        if !self.consume("SEC_EDGAR") {
            return Ok(quota_error("SEC_EDGAR"));
        }
        let url = format!("{}/CIK{:0>10}.json", SEC_SUBMISSIONS_BASE, cik);
        self.get(&url, &[]).await.context("SEC EDGAR submissions failed")
    }

    fn consume(&self, provider: &str) -> bool {
        let granted = self.quota.check_and_consume(provider);
        if !granted {
            warn!(provider = %provider, "Provider quota exhausted");
        }
        granted
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GET {} {}: {}", url, status, text));
        }

        resp.text()
            .await
            .with_context(|| format!("Failed to read body from {}", url))
    }
}

/// Terminal sentinel payload for an exhausted provider.
fn quota_error(provider: &str) -> String {
    format!("ERROR: {} QUOTA_EXCEEDED", provider)
}

fn env_key(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn require_str<'a>(params: &'a ToolParams, key: &str, tool: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .with_context(|| format!("Tool {} requires string parameter `{}`", tool, key))
}

fn optional_str(params: &ToolParams, key: &str, default: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}
