//! Reconnect delay computation.
//!
//! `delay(attempt) = min(base * 2^attempt, cap) + jitter`, with jitter drawn
//! uniformly from `[0, max_jitter)`. The scheduler keeps no state between
//! calls; the attempt count is owned by the connection worker.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    config: BackoffConfig,
}

impl BackoffScheduler {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `attempt` (zero-based), jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_without_jitter(attempt) + self.jitter()
    }

    /// The capped exponential part of the delay.
    pub fn delay_without_jitter(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.config.base.saturating_mul(factor).min(self.config.cap)
    }

    /// Upper bound of any delay this scheduler can produce.
    pub fn max_delay(&self) -> Duration {
        self.config.cap + self.config.max_jitter
    }

    fn jitter(&self) -> Duration {
        let max_nanos = u64::try_from(self.config.max_jitter.as_nanos()).unwrap_or(u64::MAX);
        if max_nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(0..max_nanos))
    }
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
