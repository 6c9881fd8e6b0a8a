//! Point-in-time snapshot storage.
//!
//! SQLite-backed, append-only store for harvested provider responses. Rows
//! are written once by the harvester and only ever read back by the replay
//! oracle; there are no update or delete paths. The replay key is
//! `(provider_endpoint, symbol, published_at)`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One immutable harvested record.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: Option<i64>,
    /// Correlates one harvest batch.
    pub run_id: String,
    pub provider: String,
    pub provider_endpoint: String,
    pub symbol: Option<String>,
    pub request_params: Map<String, Value>,
    /// Opaque serialized provider response.
    pub response_payload: String,
    /// When the harvest fetched this payload.
    pub event_timestamp: DateTime<Utc>,
    /// When the underlying data became true/known. Anti-lookahead queries
    /// filter on this, not on the harvest time.
    pub published_at: DateTime<Utc>,
    /// Storage time.
    pub ingested_at: DateTime<Utc>,
    /// Hex SHA-256 of the raw payload, for audit/dedup by consumers.
    pub payload_hash: String,
    pub leakage_flag: bool,
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS historical_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    provider_endpoint TEXT NOT NULL,
    symbol TEXT,
    request_params_json TEXT NOT NULL,
    response_payload TEXT NOT NULL,
    event_timestamp_ns INTEGER NOT NULL,
    published_at_ns INTEGER NOT NULL,
    ingested_at_ns INTEGER NOT NULL,
    payload_hash TEXT NOT NULL,
    leakage_flag INTEGER NOT NULL DEFAULT 0
);

-- The point-in-time replay key
CREATE INDEX IF NOT EXISTS idx_snapshots_replay_key
    ON historical_snapshots(provider_endpoint, symbol, published_at_ns);

-- Batch correlation
CREATE INDEX IF NOT EXISTS idx_snapshots_run
    ON historical_snapshots(run_id);

-- Audit lookups by content digest
CREATE INDEX IF NOT EXISTS idx_snapshots_hash
    ON historical_snapshots(payload_hash);
"#;

const SELECT_COLUMNS: &str = "id, run_id, provider, provider_endpoint, symbol, \
     request_params_json, response_payload, event_timestamp_ns, \
     published_at_ns, ingested_at_ns, payload_hash, leakage_flag";

/// Append-only snapshot store.
pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("Failed to open snapshot store: {}", path.display()))?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!(path = %path.display(), "Snapshot store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open in-memory storage (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a batch of snapshots in one transaction. Returns rows written.
    /// A mid-batch failure rolls the whole transaction back; the connection
    /// is reusable afterwards.
    pub fn insert_batch(&self, snapshots: &[Snapshot]) -> Result<usize> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock();
        // Rolls back on drop unless committed
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;

        let mut inserted = 0;
        for snap in snapshots {
            let params_json = serde_json::to_string(&snap.request_params)?;
            tx.execute(
                r#"
                INSERT INTO historical_snapshots (
                    run_id, provider, provider_endpoint, symbol,
                    request_params_json, response_payload, event_timestamp_ns,
                    published_at_ns, ingested_at_ns, payload_hash, leakage_flag
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    snap.run_id,
                    snap.provider,
                    snap.provider_endpoint,
                    snap.symbol,
                    params_json,
                    snap.response_payload,
                    datetime_to_nanos(snap.event_timestamp),
                    datetime_to_nanos(snap.published_at),
                    datetime_to_nanos(snap.ingested_at),
                    snap.payload_hash,
                    snap.leakage_flag as i32,
                ],
            )?;
            inserted += 1;
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// The latest snapshot known as of `as_of`: among rows matching
    /// `provider_endpoint` (and `symbol` when given) with
    /// `published_at <= as_of`, the one with maximum `published_at`.
    /// Ties broken arbitrarily.
    pub fn latest_at_or_before(
        &self,
        provider_endpoint: &str,
        symbol: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let as_of_ns = datetime_to_nanos(as_of);

        let snapshot = match symbol {
            Some(sym) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM historical_snapshots \
                     WHERE provider_endpoint = ?1 AND symbol = ?2 AND published_at_ns <= ?3 \
                     ORDER BY published_at_ns DESC LIMIT 1"
                ))?;
                stmt.query_row(params![provider_endpoint, sym, as_of_ns], row_to_snapshot)
                    .optional()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM historical_snapshots \
                     WHERE provider_endpoint = ?1 AND published_at_ns <= ?2 \
                     ORDER BY published_at_ns DESC LIMIT 1"
                ))?;
                stmt.query_row(params![provider_endpoint, as_of_ns], row_to_snapshot)
                    .optional()?
            }
        };

        Ok(snapshot)
    }

    /// All snapshots for a harvest batch, in insertion order.
    pub fn for_run(&self, run_id: &str) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM historical_snapshots \
             WHERE run_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![run_id], row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM historical_snapshots", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    let params_json: String = row.get(5)?;
    Ok(Snapshot {
        id: Some(row.get(0)?),
        run_id: row.get(1)?,
        provider: row.get(2)?,
        provider_endpoint: row.get(3)?,
        symbol: row.get(4)?,
        request_params: serde_json::from_str(&params_json).unwrap_or_default(),
        response_payload: row.get(6)?,
        event_timestamp: nanos_to_datetime(row.get(7)?),
        published_at: nanos_to_datetime(row.get(8)?),
        ingested_at: nanos_to_datetime(row.get(9)?),
        payload_hash: row.get(10)?,
        leakage_flag: row.get::<_, i32>(11)? != 0,
    })
}

fn datetime_to_nanos(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or(0)
}

fn nanos_to_datetime(nanos: i64) -> DateTime<Utc> {
    let secs = nanos.div_euclid(1_000_000_000);
    let nsecs = nanos.rem_euclid(1_000_000_000) as u32;
    DateTime::from_timestamp(secs, nsecs).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, h, m, 0).unwrap()
    }

    fn make_test_snapshot(symbol: &str, published_at: DateTime<Utc>, payload: &str) -> Snapshot {
        Snapshot {
            id: None,
            run_id: "r1".to_string(),
            provider: "MARKET_ORACLE".to_string(),
            provider_endpoint: "get_price".to_string(),
            symbol: Some(symbol.to_string()),
            request_params: serde_json::from_value(serde_json::json!({"symbol": symbol}))
                .unwrap(),
            response_payload: payload.to_string(),
            event_timestamp: published_at,
            published_at,
            ingested_at: published_at,
            payload_hash: "h".to_string(),
            leakage_flag: false,
        }
    }

    #[test]
    fn test_insert_batch_and_count() {
        let store = SnapshotStore::open_memory().unwrap();
        let batch = vec![
            make_test_snapshot("AAPL", t(8, 0), r#"{"price":1}"#),
            make_test_snapshot("MSFT", t(8, 0), r#"{"price":2}"#),
        ];
        assert_eq!(store.insert_batch(&batch).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.for_run("r1").unwrap().len(), 2);
    }

    #[test]
    fn test_latest_known_as_of_now_selection() {
        let store = SnapshotStore::open_memory().unwrap();
        store
            .insert_batch(&[
                make_test_snapshot("AAPL", t(8, 0), r#"{"price":100}"#),
                make_test_snapshot("AAPL", t(9, 0), r#"{"price":101}"#),
            ])
            .unwrap();

        // At 09:30, the 09:00 record is the latest known
        let row = store
            .latest_at_or_before("get_price", Some("AAPL"), t(9, 30))
            .unwrap()
            .unwrap();
        assert_eq!(row.published_at, t(9, 0));
        assert_eq!(row.response_payload, r#"{"price":101}"#);

        // At 08:30, only the 08:00 record is known
        let row = store
            .latest_at_or_before("get_price", Some("AAPL"), t(8, 30))
            .unwrap()
            .unwrap();
        assert_eq!(row.published_at, t(8, 0));

        // Before any record exists: nothing
        assert!(store
            .latest_at_or_before("get_price", Some("AAPL"), t(7, 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_symbol_filter_isolates_rows() {
        let store = SnapshotStore::open_memory().unwrap();
        store
            .insert_batch(&[
                make_test_snapshot("AAPL", t(8, 0), r#"{"price":100}"#),
                make_test_snapshot("MSFT", t(9, 0), r#"{"price":400}"#),
            ])
            .unwrap();

        let row = store
            .latest_at_or_before("get_price", Some("AAPL"), t(12, 0))
            .unwrap()
            .unwrap();
        assert_eq!(row.symbol.as_deref(), Some("AAPL"));

        // Without a symbol filter, the latest across symbols wins
        let row = store
            .latest_at_or_before("get_price", None, t(12, 0))
            .unwrap()
            .unwrap();
        assert_eq!(row.symbol.as_deref(), Some("MSFT"));
    }

    #[test]
    fn test_endpoint_is_part_of_replay_key() {
        let store = SnapshotStore::open_memory().unwrap();
        let mut snap = make_test_snapshot("AAPL", t(8, 0), r#"{"c":123.4}"#);
        snap.provider_endpoint = "finnhub_quote".to_string();
        store.insert_batch(&[snap]).unwrap();

        assert!(store
            .latest_at_or_before("get_price", Some("AAPL"), t(12, 0))
            .unwrap()
            .is_none());
        assert!(store
            .latest_at_or_before("finnhub_quote", Some("AAPL"), t(12, 0))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let store = SnapshotStore::open_memory().unwrap();
        let snap = make_test_snapshot("AAPL", t(8, 0), r#"{"price":100}"#);
        store.insert_batch(&[snap]).unwrap();

        let row = store
            .latest_at_or_before("get_price", Some("AAPL"), t(8, 0))
            .unwrap()
            .unwrap();
        assert_eq!(row.run_id, "r1");
        assert_eq!(row.provider, "MARKET_ORACLE");
        assert_eq!(row.request_params["symbol"], "AAPL");
        assert!(!row.leakage_flag);
        assert_eq!(row.event_timestamp, t(8, 0));
    }

    #[test]
    fn test_failed_batch_rolls_back_and_store_stays_usable() {
        let store = SnapshotStore::open_memory().unwrap();
        // Force a mid-batch constraint violation: every fixture shares the
        // same payload_hash, so the second row trips the unique index
        store
            .conn
            .lock()
            .execute(
                "CREATE UNIQUE INDEX idx_test_hash_unique \
                 ON historical_snapshots(payload_hash)",
                [],
            )
            .unwrap();

        let batch = vec![
            make_test_snapshot("AAPL", t(8, 0), r#"{"price":1}"#),
            make_test_snapshot("MSFT", t(8, 0), r#"{"price":2}"#),
        ];
        assert!(store.insert_batch(&batch).is_err());

        // Nothing from the failed batch persists
        assert_eq!(store.count().unwrap(), 0);

        // The connection is not stuck in the aborted transaction
        let ok = vec![make_test_snapshot("AAPL", t(9, 0), r#"{"price":3}"#)];
        assert_eq!(store.insert_batch(&ok).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.db");
        let store = SnapshotStore::open(&path).unwrap();
        store
            .insert_batch(&[make_test_snapshot("AAPL", t(8, 0), "{}")])
            .unwrap();
        drop(store);

        let reopened = SnapshotStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
