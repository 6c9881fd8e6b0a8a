//! Per-provider call budgets.
//!
//! Every outbound provider call must pass through [`QuotaManager::check_and_consume`]
//! before it is made. The manager is constructed once from config and injected
//! wherever it is needed; there is deliberately no global instance, so tests
//! and concurrent runs cannot cross-contaminate usage counters.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Tracks consumed calls against configured per-provider limits.
///
/// A provider absent from the limit map is unlimited. Usage counters are
/// monotonically non-decreasing for the lifetime of the manager.
pub struct QuotaManager {
    limits: HashMap<String, u64>,
    usage: Mutex<HashMap<String, u64>>,
}

impl QuotaManager {
    pub fn new(limits: HashMap<String, u64>) -> Self {
        Self {
            limits,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Atomic test-and-increment: returns true and consumes one call if the
    /// provider has remaining budget, false without mutation otherwise.
    ///
    /// The whole check-then-increment runs under one lock acquisition, so a
    /// consumed count can never exceed its limit even on a multi-threaded
    /// runtime.
    pub fn check_and_consume(&self, provider: &str) -> bool {
        let Some(&limit) = self.limits.get(provider) else {
            return true;
        };

        let mut usage = self.usage.lock();
        let count = usage.entry(provider.to_string()).or_insert(0);
        if *count >= limit {
            return false;
        }
        *count += 1;
        true
    }

    /// Calls consumed so far for a provider.
    pub fn used(&self, provider: &str) -> u64 {
        self.usage.lock().get(provider).copied().unwrap_or(0)
    }

    /// Configured limit, if any.
    pub fn limit(&self, provider: &str) -> Option<u64> {
        self.limits.get(provider).copied()
    }

    /// Fraction of a provider's budget already consumed, if it has one.
    pub fn pressure(&self, provider: &str) -> Option<f64> {
        let limit = self.limit(provider)?;
        if limit == 0 {
            return Some(1.0);
        }
        Some(self.used(provider) as f64 / limit as f64)
    }

    /// `(provider, used, limit)` rows for all limited providers, for logging.
    pub fn snapshot(&self) -> Vec<(String, u64, u64)> {
        let usage = self.usage.lock();
        let mut rows: Vec<_> = self
            .limits
            .iter()
            .map(|(provider, &limit)| {
                let used = usage.get(provider).copied().unwrap_or(0);
                (provider.clone(), used, limit)
            })
            .collect();
        rows.sort();
        rows
    }
}
