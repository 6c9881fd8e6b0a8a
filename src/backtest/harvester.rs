//! Historical snapshot harvester.
//!
//! Pulls current provider data per symbol through the oracle, derives the
//! true publication timestamp from the payload, filters forward-looking
//! summary content, and persists the whole batch as immutable snapshots in
//! one transaction.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backtest::clock::TimeProvider;
use crate::backtest::oracle::{OracleClient, OracleQuery};
use crate::backtest::store::{Snapshot, SnapshotStore};
use crate::data::providers::ToolParams;

/// Provider tag stored on records harvested through the oracle's primary
/// price capability.
const ORACLE_PROVIDER: &str = "MARKET_ORACLE";

/// One fetched payload awaiting persistence.
#[derive(Debug, Clone)]
pub struct HarvestRecord {
    pub provider: String,
    pub provider_endpoint: String,
    pub symbol: Option<String>,
    pub request_params: ToolParams,
    pub response_payload: String,
    /// When the harvest fetched this payload. Also the `published_at`
    /// fallback when the payload carries no usable timestamp.
    pub event_timestamp: DateTime<Utc>,
}

pub struct Harvester {
    oracle: Arc<OracleClient>,
    store: Arc<SnapshotStore>,
    time: TimeProvider,
    /// Lowercased forward-looking markers; payloads containing any are
    /// dropped before persistence.
    leakage_markers: Vec<String>,
}

impl Harvester {
    pub fn new(
        oracle: Arc<OracleClient>,
        store: Arc<SnapshotStore>,
        time: TimeProvider,
        leakage_markers: Vec<String>,
    ) -> Self {
        Self {
            oracle,
            store,
            time,
            leakage_markers: leakage_markers
                .into_iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    /// Fetch the price capability for each symbol and persist the batch.
    /// Returns the batch's `run_id` (generated when not supplied).
    pub async fn harvest_symbol_prices(
        &self,
        symbols: &[String],
        run_id: Option<String>,
    ) -> Result<String> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = self.time.now();

        let mut records = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let payload = self.oracle.fetch(&OracleQuery::price(symbol)).await?;
            let mut request_params = ToolParams::new();
            request_params.insert("symbol".to_string(), json!(symbol));
            records.push(HarvestRecord {
                provider: ORACLE_PROVIDER.to_string(),
                provider_endpoint: "get_price".to_string(),
                symbol: Some(symbol.clone()),
                request_params,
                response_payload: payload,
                event_timestamp: now,
            });
        }

        let inserted = self.persist_records(&run_id, &records)?;
        info!(
            run_id = %run_id,
            symbols = symbols.len(),
            inserted,
            "Harvest batch persisted"
        );
        Ok(run_id)
    }

    /// Whether a payload reads as forward-looking summary content that
    /// likely anticipates information beyond its nominal timestamp.
    pub fn is_forward_looking(&self, payload: &str) -> bool {
        let lowered = payload.to_lowercase();
        self.leakage_markers.iter().any(|m| lowered.contains(m))
    }

    /// Persist a batch of records in one transaction, dropping
    /// leakage-flagged payloads and deriving `published_at` per record.
    /// Returns the number of rows written.
    pub fn persist_records(&self, run_id: &str, records: &[HarvestRecord]) -> Result<usize> {
        let ingested_at = self.time.now();

        let mut snapshots = Vec::with_capacity(records.len());
        for rec in records {
            if self.is_forward_looking(&rec.response_payload) {
                debug!(
                    run_id = %run_id,
                    symbol = ?rec.symbol,
                    "Dropping forward-looking payload"
                );
                continue;
            }

            let published_at = parse_published_at(&rec.response_payload, rec.event_timestamp);
            snapshots.push(Snapshot {
                id: None,
                run_id: run_id.to_string(),
                provider: rec.provider.clone(),
                provider_endpoint: rec.provider_endpoint.clone(),
                symbol: rec.symbol.clone(),
                request_params: rec.request_params.clone(),
                response_payload: rec.response_payload.clone(),
                event_timestamp: rec.event_timestamp,
                published_at,
                ingested_at,
                payload_hash: payload_hash(&rec.response_payload),
                leakage_flag: false,
            });
        }

        self.store.insert_batch(&snapshots)
    }
}

/// Hex SHA-256 digest of a raw payload.
pub fn payload_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Derive the publication time from a structured payload.
///
/// Keys `published_at`, `datetime`, `timestamp` are checked in that priority
/// order. A string value is parsed as ISO-8601 (trailing `Z` is UTC; naive
/// values are assumed UTC); a numeric value is a unix epoch in seconds. If
/// nothing parses, the harvest-time `fallback` is returned — real feeds
/// often report a publication time earlier (or, for delayed feeds, later)
/// than the fetch.
pub fn parse_published_at(payload: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let Ok(decoded) = serde_json::from_str::<Value>(payload) else {
        return fallback;
    };
    let Some(obj) = decoded.as_object() else {
        return fallback;
    };

    for key in ["published_at", "datetime", "timestamp"] {
        match obj.get(key) {
            Some(Value::String(raw)) => {
                if let Some(ts) = parse_iso8601(raw) {
                    return ts;
                }
                // Unparseable string: fall through to the next key
            }
            Some(Value::Number(num)) => {
                if let Some(ts) = num.as_f64().and_then(epoch_to_datetime) {
                    return ts;
                }
            }
            _ => {}
        }
    }
    fallback
}

fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}
