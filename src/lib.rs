//! MarketOracle Backend Library
//!
//! Point-in-time market data replay engine: quota-gated live providers, an
//! immutable snapshot harvester, and an oracle that serves either live or
//! backtested data with a hard no-lookahead guarantee.

pub mod backtest;
pub mod config;
pub mod data;
