//! Connection health bookkeeping.
//!
//! The tracker only counts; it never triggers transitions. The connection
//! worker writes to it and the facade reads derived signals from it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::ConnectionStatus;

/// At or above this many consecutive failures the connection is unhealthy.
pub const UNHEALTHY_CONSECUTIVE_FAILURES: u32 = 3;

/// The success rate must exceed this for the connection to be healthy.
pub const MIN_HEALTHY_SUCCESS_RATE: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    attempts: u64,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    last_attempt_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
        self.last_attempt_at = Some(Utc::now());
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
        self.consecutive_failures = 0;
        self.last_success_at = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(Utc::now());
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn status(&self) -> HealthMetrics {
        let success_rate = if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        };

        HealthMetrics {
            attempts: self.attempts,
            successes: self.successes,
            failures: self.failures,
            consecutive_failures: self.consecutive_failures,
            success_rate,
            is_healthy: self.consecutive_failures < UNHEALTHY_CONSECUTIVE_FAILURES
                && success_rate > MIN_HEALTHY_SUCCESS_RATE,
            last_attempt_at: self.last_attempt_at,
            last_success_at: self.last_success_at,
            last_failure_at: self.last_failure_at,
        }
    }
}

/// Point-in-time copy of the tracker with derived values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub is_healthy: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Result of `RealtimeManager::get_health_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub is_healthy: bool,
    pub active_subscriptions: usize,
    pub channel_status: ConnectionStatus,
}

impl HealthStatus {
    pub fn new(
        metrics: &HealthMetrics,
        active_subscriptions: usize,
        channel_status: ConnectionStatus,
    ) -> Self {
        Self {
            attempts: metrics.attempts,
            successes: metrics.successes,
            failures: metrics.failures,
            consecutive_failures: metrics.consecutive_failures,
            success_rate: metrics.success_rate,
            is_healthy: metrics.is_healthy,
            active_subscriptions,
            channel_status,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Health: {} ({}), attempts={}, successes={}, failures={}, consecutive_failures={}, success_rate={:.2}, subscriptions={}",
            if self.is_healthy { "healthy" } else { "unhealthy" },
            self.channel_status,
            self.attempts,
            self.successes,
            self.failures,
            self.consecutive_failures,
            self.success_rate,
            self.active_subscriptions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker_is_unhealthy() {
        let metrics = HealthTracker::new().status();
        assert_eq!(metrics.success_rate, 0.0);
        assert!(!metrics.is_healthy);
        assert!(metrics.last_attempt_at.is_none());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut tracker = HealthTracker::new();
        for _ in 0..4 {
            tracker.record_attempt();
            tracker.record_failure();
        }
        assert_eq!(tracker.status().consecutive_failures, 4);

        tracker.record_attempt();
        tracker.record_success();

        let metrics = tracker.status();
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.attempts, 5);
        assert_eq!(metrics.failures, 4);
        assert!((metrics.success_rate - 0.2).abs() < f64::EPSILON);
        assert!(!metrics.is_healthy);
    }

    #[test]
    fn test_healthy_requires_majority_success_and_few_failures() {
        let mut tracker = HealthTracker::new();
        tracker.record_attempt();
        tracker.record_success();
        assert!(tracker.status().is_healthy);

        tracker.record_failure();
        tracker.record_failure();
        assert!(tracker.status().is_healthy);

        tracker.record_failure();
        assert!(!tracker.status().is_healthy);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut tracker = HealthTracker::new();
        tracker.record_attempt();
        tracker.record_failure();
        tracker.reset();

        let metrics = tracker.status();
        assert_eq!(metrics.attempts, 0);
        assert_eq!(metrics.failures, 0);
        assert!(metrics.last_failure_at.is_none());
    }

    #[test]
    fn test_health_status_display() {
        let mut tracker = HealthTracker::new();
        tracker.record_attempt();
        tracker.record_success();
        let status = HealthStatus::new(&tracker.status(), 2, ConnectionStatus::Connected);

        let text = status.to_string();
        assert!(text.contains("healthy"));
        assert!(text.contains("connected"));
        assert!(text.contains("subscriptions=2"));
    }
}
