//! Oracle read side.
//!
//! The single abstraction decision logic reads market data through. In live
//! mode a query is dispatched to the provider tool registry; in backtest
//! mode it is answered from the snapshot store under a strict
//! "known as of now" constraint: no query can ever observe a snapshot whose
//! `published_at` is in the simulated future.
//!
//! Recoverable conditions (unknown tool, missing point-in-time data) are
//! returned as structured JSON payloads so decision logic can branch on them
//! without error handling; transport failures propagate as errors.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::backtest::clock::{RunMode, TimeProvider};
use crate::backtest::store::SnapshotStore;
use crate::data::providers::{ToolParams, ToolRegistry};

/// A read request. Not persisted.
#[derive(Debug, Clone)]
pub struct OracleQuery {
    pub provider_endpoint: String,
    pub symbol: Option<String>,
    pub params: ToolParams,
}

impl OracleQuery {
    pub fn new(provider_endpoint: &str, symbol: Option<&str>, params: ToolParams) -> Self {
        Self {
            provider_endpoint: provider_endpoint.to_string(),
            symbol: symbol.map(str::to_string),
            params,
        }
    }

    /// Query for the primary price capability of one symbol.
    pub fn price(symbol: &str) -> Self {
        let mut params = ToolParams::new();
        params.insert("symbol".to_string(), json!(symbol));
        Self::new("get_price", Some(symbol), params)
    }
}

/// Serves either live provider responses or point-in-time snapshots,
/// depending on the active [`RunMode`].
pub struct OracleClient {
    time: TimeProvider,
    store: Arc<SnapshotStore>,
    registry: Arc<ToolRegistry>,
}

impl OracleClient {
    pub fn new(time: TimeProvider, store: Arc<SnapshotStore>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            time,
            store,
            registry,
        }
    }

    /// Fetch the payload for a query under the active mode.
    pub async fn fetch(&self, query: &OracleQuery) -> Result<String> {
        match self.time.mode() {
            RunMode::Backtest => self.fetch_backtest(query),
            RunMode::Live => self.fetch_live(query).await,
        }
    }

    async fn fetch_live(&self, query: &OracleQuery) -> Result<String> {
        if !self.registry.contains(&query.provider_endpoint) {
            return Ok(json!({
                "error": format!("unknown_tool:{}", query.provider_endpoint)
            })
            .to_string());
        }
        self.registry.call(&query.provider_endpoint, &query.params).await
    }

    fn fetch_backtest(&self, query: &OracleQuery) -> Result<String> {
        let now = self.time.now();
        let row = self.store.latest_at_or_before(
            &query.provider_endpoint,
            query.symbol.as_deref(),
            now,
        )?;

        match row {
            Some(snap) => {
                debug!(
                    endpoint = %query.provider_endpoint,
                    symbol = ?query.symbol,
                    published_at = %snap.published_at,
                    as_of = %now,
                    "Replay snapshot served"
                );
                Ok(snap.response_payload)
            }
            None => Ok(json!({
                "error": "DATA_MISSING_AT_TIME",
                "provider_endpoint": query.provider_endpoint,
                "symbol": query.symbol,
                "as_of": now.to_rfc3339(),
            })
            .to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::clock::SimulatedClock;
    use crate::backtest::store::Snapshot;
    use crate::data::quota::QuotaManager;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value;
    use std::collections::HashMap;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, h, m, 0).unwrap()
    }

    fn make_snapshot(symbol: &str, published_at: DateTime<Utc>, payload: &str) -> Snapshot {
        Snapshot {
            id: None,
            run_id: "r1".to_string(),
            provider: "FINNHUB".to_string(),
            provider_endpoint: "finnhub_quote".to_string(),
            symbol: Some(symbol.to_string()),
            request_params: ToolParams::new(),
            response_payload: payload.to_string(),
            event_timestamp: published_at,
            published_at,
            ingested_at: published_at,
            payload_hash: "h".to_string(),
            leakage_flag: false,
        }
    }

    fn backtest_client(now: DateTime<Utc>, snapshots: &[Snapshot]) -> OracleClient {
        let store = Arc::new(SnapshotStore::open_memory().unwrap());
        store.insert_batch(snapshots).unwrap();
        let registry =
            Arc::new(ToolRegistry::new(Arc::new(QuotaManager::new(HashMap::new()))).unwrap());
        let time = TimeProvider::backtest(SimulatedClock::new(now));
        OracleClient::new(time, store, registry)
    }

    #[tokio::test]
    async fn test_backtest_returns_historical_payload() {
        let client = backtest_client(t(9, 0), &[make_snapshot("AAPL", t(8, 0), r#"{"c":123.4}"#)]);
        let query = OracleQuery::new("finnhub_quote", Some("AAPL"), ToolParams::new());
        let payload = client.fetch(&query).await.unwrap();
        assert_eq!(payload, r#"{"c":123.4}"#);
    }

    #[tokio::test]
    async fn test_no_lookahead_past_simulated_now() {
        let snaps = vec![
            make_snapshot("AAPL", t(8, 0), r#"{"c":1}"#),
            make_snapshot("AAPL", t(9, 0), r#"{"c":2}"#),
            make_snapshot("AAPL", t(15, 0), r#"{"c":3}"#),
        ];
        // At 09:30, the 15:00 snapshot must be invisible; 09:00 wins
        let client = backtest_client(t(9, 30), &snaps);
        let query = OracleQuery::new("finnhub_quote", Some("AAPL"), ToolParams::new());
        assert_eq!(client.fetch(&query).await.unwrap(), r#"{"c":2}"#);

        // At 08:30, only 08:00 is known
        let client = backtest_client(t(8, 30), &snaps);
        assert_eq!(client.fetch(&query).await.unwrap(), r#"{"c":1}"#);
    }

    #[tokio::test]
    async fn test_missing_data_sentinel_shape() {
        let client = backtest_client(t(7, 0), &[make_snapshot("AAPL", t(8, 0), r#"{"c":1}"#)]);
        let query = OracleQuery::new("finnhub_quote", Some("AAPL"), ToolParams::new());
        let payload = client.fetch(&query).await.unwrap();

        let parsed: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["error"], "DATA_MISSING_AT_TIME");
        assert_eq!(parsed["provider_endpoint"], "finnhub_quote");
        assert_eq!(parsed["symbol"], "AAPL");
        let as_of: DateTime<Utc> = parsed["as_of"].as_str().unwrap().parse().unwrap();
        assert_eq!(as_of, t(7, 0));
    }

    #[tokio::test]
    async fn test_live_unknown_tool_is_structured_data() {
        let store = Arc::new(SnapshotStore::open_memory().unwrap());
        let registry =
            Arc::new(ToolRegistry::new(Arc::new(QuotaManager::new(HashMap::new()))).unwrap());
        let client = OracleClient::new(TimeProvider::live(), store, registry);

        let query = OracleQuery::new("definitely_not_a_tool", None, ToolParams::new());
        let payload = client.fetch(&query).await.unwrap();
        let parsed: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["error"], "unknown_tool:definitely_not_a_tool");
    }
}
