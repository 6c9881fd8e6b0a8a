//! Backtest orchestration.
//!
//! The runner owns the simulated clock and is its only writer. It walks a
//! fixed daily schedule of decision windows from `clock_start` to
//! `clock_end` (inclusive), advancing the clock to each window's exact
//! timestamp and awaiting the decision hook before moving on. Windows are
//! strictly sequential; the clock only ever moves forward.
//!
//! There is no cancellation or timeout around the hook: a hook that never
//! completes stalls the backtest indefinitely. Known gap, not supported
//! behavior.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::future::Future;
use tracing::{debug, info};

use crate::backtest::clock::{SimulatedClock, TimeProvider};
use crate::backtest::gate::TradeGate;
use crate::config::AppConfig;

/// Fixed market-open time the `open_plus` window is offset from.
const MARKET_OPEN: (u32, u32) = (9, 30);

/// Daily decision windows, in scheduling order.
const WINDOW_NAMES: [&str; 4] = ["premarket", "open_plus", "noon", "reflection"];

pub struct BacktestRunner {
    time: TimeProvider,
    gate: TradeGate,
    end: DateTime<Utc>,
    wait_seconds: u64,
    premarket: NaiveTime,
    open_plus_minutes: i64,
    noon: NaiveTime,
    reflection: NaiveTime,
}

impl BacktestRunner {
    /// Build a runner with its clock held at `backtest.clock_start`.
    /// Window times are validated up front so a malformed schedule fails
    /// before the run starts.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let start = parse_rfc3339(&config.backtest.clock_start)
            .context("Invalid backtest.clock_start")?;
        let end =
            parse_rfc3339(&config.backtest.clock_end).context("Invalid backtest.clock_end")?;

        let windows = &config.schedule.windows;
        Ok(Self {
            time: TimeProvider::backtest(SimulatedClock::new(start)),
            gate: TradeGate::new(config),
            end,
            wait_seconds: config.backtest.simulated_wait_seconds,
            premarket: parse_hm(&windows.premarket).context("Invalid schedule premarket")?,
            open_plus_minutes: windows.open_plus_minutes,
            noon: parse_hm(&windows.noon).context("Invalid schedule noon")?,
            reflection: parse_hm(&windows.reflection).context("Invalid schedule reflection")?,
        })
    }

    /// Read-side clone of the runner's clock, for wiring the oracle and
    /// harvester to the same simulated time.
    pub fn time_provider(&self) -> TimeProvider {
        self.time.clone()
    }

    /// Step the clock through every in-range window, awaiting the decision
    /// hook at each. Hook failures propagate and abort the run. The
    /// configured wait between windows is wall-clock pacing, not simulated
    /// time.
    pub async fn run<F, Fut>(&self, mut hook: F) -> Result<()>
    where
        F: FnMut(&'static str, DateTime<Utc>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        info!(
            start = %self.time.now(),
            end = %self.end,
            "Backtest run starting"
        );

        let mut current_day = self.time.now().date_naive();
        let end_day = self.end.date_naive();

        while current_day <= end_day {
            for (name, event_time) in self.daily_windows(current_day) {
                // Already passed (first day) or beyond the run end: skip
                if event_time < self.time.now() || event_time > self.end {
                    continue;
                }
                self.time.advance_to(event_time);
                debug!(window = name, at = %event_time, "Decision window reached");
                hook(name, self.time.now()).await?;
                tokio::time::sleep(std::time::Duration::from_secs(self.wait_seconds)).await;
            }
            current_day = current_day
                .succ_opt()
                .context("Backtest ran off the end of the calendar")?;
        }

        info!(finished_at = %self.time.now(), "Backtest run complete");
        Ok(())
    }

    /// The four windows of one simulated day, in order.
    fn daily_windows(&self, day: NaiveDate) -> [(&'static str, DateTime<Utc>); 4] {
        let at = |time: NaiveTime| day.and_time(time).and_utc();
        let market_open = day
            .and_hms_opt(MARKET_OPEN.0, MARKET_OPEN.1, 0)
            .expect("fixed market open is a valid time")
            .and_utc();
        [
            (WINDOW_NAMES[0], at(self.premarket)),
            (
                WINDOW_NAMES[1],
                market_open + Duration::minutes(self.open_plus_minutes),
            ),
            (WINDOW_NAMES[2], at(self.noon)),
            (WINDOW_NAMES[3], at(self.reflection)),
        ]
    }

    /// Notional gate for orders produced inside decision hooks.
    pub fn allow_order_notional(
        &self,
        existing_daily_notional: f64,
        proposed_notional: f64,
    ) -> bool {
        self.gate
            .enforce_backtest_notional_cap(existing_daily_notional, proposed_notional)
    }
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Not an RFC3339 timestamp: {}", value))?
        .with_timezone(&Utc))
}

fn parse_hm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .with_context(|| format!("Not an HH:MM time: {}", value))
}
