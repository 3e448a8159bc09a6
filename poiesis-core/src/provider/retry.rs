//! Retry backoff for phase attempts
//!
//! Exponential backoff with jitter. Jitter matters here: when a shared
//! provider degrades, many executions fail at the same moment and would
//! otherwise retry in lockstep.

use std::time::Duration;

use crate::config::RetrySettings;

/// Retry configuration for one phase
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum total attempts (initial + retries)
    pub max_attempts: u32,
    /// Initial delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add jitter to prevent thundering herd
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default(), 3)
    }
}

impl RetryConfig {
    /// Build from engine settings and a phase's retry budget.
    ///
    /// `max_retries` is the number of retries after the initial attempt, so
    /// `max_retries = 2` yields 3 total attempts.
    pub fn from_settings(settings: &RetrySettings, max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries + 1,
            initial_delay: settings.initial_delay,
            max_delay: settings.max_delay,
            backoff_multiplier: settings.backoff_multiplier,
            add_jitter: settings.add_jitter,
        }
    }

    /// Builder: enable/disable jitter
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let clamped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.add_jitter {
            // Up to 25% jitter
            let jitter = clamped_delay * 0.25 * rand_jitter();
            clamped_delay + jitter
        } else {
            clamped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0)
/// Uses an LCG over a counter and the clock; good enough for spreading delays
fn rand_jitter() -> f64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEED: AtomicU64 = AtomicU64::new(0);

    const A: u64 = 1103515245;
    const C: u64 = 12345;
    const M: u64 = 1 << 31;

    let seed = SEED.fetch_add(1, Ordering::Relaxed);
    let time_component = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let combined = seed.wrapping_add(time_component);
    let next = (A.wrapping_mul(combined).wrapping_add(C)) % M;

    (next as f64) / (M as f64)
}
