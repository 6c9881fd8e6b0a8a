//! Simulated clock and the mode-switching time source.
//!
//! All decision logic reads time through [`TimeProvider`]. In backtest mode
//! it serves a held simulated value that only the runner advances; in live
//! mode it serves wall-clock UTC. Backtest mode without a configured
//! simulated clock is a fatal configuration error: `now()` panics rather
//! than silently falling back to wall-clock, which would poison a replay.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// Steppable simulated clock. Held time is monotonically non-decreasing:
/// `advance_to` asserts against backward movement.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    current: DateTime<Utc>,
}

impl SimulatedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: start }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.current
    }

    /// Set the held time. Asserts the clock never moves backward.
    pub fn advance_to(&mut self, next: DateTime<Utc>) -> DateTime<Utc> {
        debug_assert!(
            next >= self.current,
            "SimulatedClock: cannot go backward from {} to {}",
            self.current,
            next
        );
        self.current = next;
        self.current
    }

    pub fn advance_seconds(&mut self, seconds: i64) -> DateTime<Utc> {
        self.current += Duration::seconds(seconds);
        self.current
    }
}

/// Whether time (and the oracle) serves live or replayed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    Backtest,
}

struct TimeState {
    mode: RunMode,
    clock: Option<SimulatedClock>,
}

/// Cheaply cloneable time handle. The backtest runner holds the writing
/// clone; the oracle and harvester read through their own clones.
#[derive(Clone)]
pub struct TimeProvider {
    inner: Arc<RwLock<TimeState>>,
}

impl TimeProvider {
    pub fn live() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TimeState {
                mode: RunMode::Live,
                clock: None,
            })),
        }
    }

    pub fn backtest(clock: SimulatedClock) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TimeState {
                mode: RunMode::Backtest,
                clock: Some(clock),
            })),
        }
    }

    pub fn mode(&self) -> RunMode {
        self.inner.read().mode
    }

    /// Current time under the active mode.
    ///
    /// # Panics
    /// In backtest mode with no simulated clock configured. This is a
    /// configuration error that must fail loudly, never a wall-clock
    /// fallback.
    pub fn now(&self) -> DateTime<Utc> {
        let state = self.inner.read();
        match state.mode {
            RunMode::Live => Utc::now(),
            RunMode::Backtest => state
                .clock
                .as_ref()
                .map(SimulatedClock::now)
                .expect("backtest mode requires a configured SimulatedClock"),
        }
    }

    /// Swap mode (and simulated source) at runtime.
    pub fn set_mode(&self, mode: RunMode, clock: Option<SimulatedClock>) {
        let mut state = self.inner.write();
        state.mode = mode;
        state.clock = clock;
    }

    /// Advance the simulated clock to an absolute time. Runner-side only.
    ///
    /// # Panics
    /// If no simulated clock is configured.
    pub fn advance_to(&self, next: DateTime<Utc>) -> DateTime<Utc> {
        let mut state = self.inner.write();
        state
            .clock
            .as_mut()
            .expect("advance_to requires a configured SimulatedClock")
            .advance_to(next)
    }

    /// Advance the simulated clock by whole seconds. Runner-side only.
    ///
    /// # Panics
    /// If no simulated clock is configured.
    pub fn advance_seconds(&self, seconds: i64) -> DateTime<Utc> {
        let mut state = self.inner.write();
        state
            .clock
            .as_mut()
            .expect("advance_seconds requires a configured SimulatedClock")
            .advance_seconds(seconds)
    }
}
