//! Retry budget and exponential backoff.

use rand::Rng;
use std::time::Duration;

/// Retry policy for Temporary faults.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPlan {
    /// Attempts per strategy, the first one included.
    pub max_attempts: u32,
    pub base_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPlan {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_ms: 250,
            factor: 2.0,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryPlan {
    /// No waiting between attempts. Used by tests and tight loops.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_ms: 0,
            factor: 1.0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Delay before retry number `retry_idx` (0 for the first retry).
///
/// Exponential in `retry_idx`, capped at `max_delay_ms`, with ±50% jitter
/// when enabled. The cap applies after jitter.
pub fn backoff_delay(plan: &RetryPlan, retry_idx: u32) -> Duration {
    let pow = plan.factor.powi(retry_idx.min(i32::MAX as u32) as i32);
    let base = (plan.base_ms as f64 * pow).round().min(u64::MAX as f64) as u64;
    let delay = if plan.jitter && base > 1 {
        let low = base / 2;
        let high = base.saturating_add(base / 2);
        rand::thread_rng().gen_range(low..=high)
    } else {
        base
    };
    Duration::from_millis(delay.min(plan.max_delay_ms))
}
