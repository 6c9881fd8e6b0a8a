//! Point-in-time replay engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BacktestRunner                         │
//! │   (owns TimeProvider, drives windows, gates notional)       │
//! └─────────────────────────────────────────────────────────────┘
//!                │                               │
//!                ▼                               ▼
//!        ┌──────────────┐                ┌──────────────┐
//!        │ TimeProvider │◀── reads ──────│ decision hook│
//!        │ (sim clock)  │                └──────┬───────┘
//!        └──────────────┘                       │
//!                ▲                              ▼
//!                │ reads                 ┌──────────────┐
//!        ┌───────┴──────┐   PIT query   │ OracleClient │
//!        │  Harvester   │   ┌───────────│ (live/replay)│
//!        └──────┬───────┘   │           └──────┬───────┘
//!               │ writes    ▼                  │ live
//!        ┌──────────────────────┐       ┌──────────────┐
//!        │    SnapshotStore     │       │ ToolRegistry │
//!        │ (append-only SQLite) │       │ (quota-gated)│
//!        └──────────────────────┘       └──────────────┘
//! ```
//!
//! # Anti-lookahead guarantee
//!
//! Replay reads go through [`OracleClient`], which only ever serves the
//! latest snapshot with `published_at <= now` under the simulated clock.
//! Snapshots are immutable once written; the clock is monotonic and owned
//! solely by the runner.

pub mod clock;
pub mod gate;
pub mod harvester;
pub mod oracle;
pub mod runner;
pub mod store;

pub use clock::{RunMode, SimulatedClock, TimeProvider};
pub use gate::TradeGate;
pub use harvester::{HarvestRecord, Harvester};
pub use oracle::{OracleClient, OracleQuery};
pub use runner::BacktestRunner;
pub use store::{Snapshot, SnapshotStore};
