//! Order gating.
//!
//! The notional cap only binds in backtest mode: live order flow is governed
//! elsewhere, while replay runs are held inside a configured daily band so a
//! single simulated decision cannot blow up the notional budget.

use crate::config::AppConfig;

pub struct TradeGate {
    backtest_mode: bool,
    notional_min: f64,
    notional_max: f64,
    min_edge_after_cost_pct: f64,
    min_win_prob: f64,
}

impl TradeGate {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            backtest_mode: config.is_backtest(),
            notional_min: config.backtest.daily_notional_min,
            notional_max: config.backtest.daily_notional_max,
            min_edge_after_cost_pct: config.risk.min_edge_after_cost_pct,
            min_win_prob: config.risk.min_win_prob,
        }
    }

    /// Thesis-quality thresholds from `[risk]`.
    pub fn passes_thresholds(&self, edge_after_cost_pct: f64, win_prob: f64) -> bool {
        edge_after_cost_pct >= self.min_edge_after_cost_pct && win_prob >= self.min_win_prob
    }

    /// Outside backtest mode always permits; inside, permits only when
    /// `existing + proposed` lands in the configured `[min, max]` band.
    pub fn enforce_backtest_notional_cap(
        &self,
        existing_daily_notional: f64,
        proposed_notional: f64,
    ) -> bool {
        if !self.backtest_mode {
            return true;
        }
        let projected = existing_daily_notional + proposed_notional;
        self.notional_min <= projected && projected <= self.notional_max
    }
}
