//! Configuration types for the realtime-stream crate
//!
//! This module defines the configuration that controls the behavior of the
//! RealtimeManager: which channel to open, how aggressively to reconnect,
//! and how often to heartbeat and poll.

use std::time::Duration;

use crate::error::ManagerError;
use crate::types::ChannelFilter;

/// What the connection worker does once reconnect attempts are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Fall back to periodic `POLL_UPDATE` cues (non-terminal)
    #[default]
    Poll,
    /// Stop in the `failed` state until `force_reconnect` is called
    Fail,
}

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    /// Default: 1 second
    pub base: Duration,

    /// Upper bound on the exponential part of the delay
    /// Default: 30 seconds
    pub cap: Duration,

    /// Jitter is drawn uniformly from `[0, max_jitter)`
    /// Default: 1 second
    pub max_jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
        }
    }
}

/// Configuration for the RealtimeManager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Name of the single multiplexed channel
    /// Default: "crm-realtime"
    pub channel_name: String,

    /// Scope requested from the provider when opening the channel
    /// Default: every event in the `public` schema
    pub channel_filter: ChannelFilter,

    /// Consecutive failed connection attempts before giving up on live mode
    /// Default: 5
    pub max_reconnect_attempts: u32,

    /// Reconnect backoff parameters
    pub backoff: BackoffConfig,

    /// How long to wait for the provider's subscription acknowledgement
    /// Default: 10 seconds
    pub subscribe_timeout: Duration,

    /// Interval between liveness probes while connected
    /// Default: 30 seconds
    pub heartbeat_interval: Duration,

    /// Interval between `POLL_UPDATE` cues while polling
    /// Default: 30 seconds
    pub poll_interval: Duration,

    /// Behavior once reconnect attempts are exhausted
    /// Default: Poll
    pub exhaustion_policy: ExhaustionPolicy,

    /// Callbacks running longer than this are logged as slow
    /// Default: 250 milliseconds
    pub slow_callback_threshold: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            channel_name: "crm-realtime".to_string(),
            channel_filter: ChannelFilter::default(),
            max_reconnect_attempts: 5,
            backoff: BackoffConfig::default(),
            subscribe_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(30),
            exhaustion_policy: ExhaustionPolicy::Poll,
            slow_callback_threshold: Duration::from_millis(250),
        }
    }
}

impl ManagerConfig {
    /// Create a new ManagerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ManagerConfig that recovers quickly from short outages
    pub fn fast_recovery() -> Self {
        Self {
            backoff: BackoffConfig {
                base: Duration::from_millis(250),
                cap: Duration::from_secs(5),
                max_jitter: Duration::from_millis(250),
            },
            subscribe_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(15),
            poll_interval: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Create a ManagerConfig optimized for resource efficiency
    pub fn resource_efficient() -> Self {
        Self {
            max_reconnect_attempts: 3,
            backoff: BackoffConfig {
                cap: Duration::from_secs(60),
                ..Default::default()
            },
            heartbeat_interval: Duration::from_secs(60),
            poll_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.channel_name.trim().is_empty() {
            return Err(ManagerError::Configuration(
                "Channel name must not be empty".to_string(),
            ));
        }

        if self.max_reconnect_attempts == 0 {
            return Err(ManagerError::Configuration(
                "Max reconnect attempts must be greater than 0".to_string(),
            ));
        }

        if self.backoff.base.is_zero() {
            return Err(ManagerError::Configuration(
                "Backoff base delay must be greater than 0".to_string(),
            ));
        }

        if self.backoff.base > self.backoff.cap {
            return Err(ManagerError::Configuration(
                "Invalid backoff: base must not exceed cap".to_string(),
            ));
        }

        if self.subscribe_timeout.is_zero() {
            return Err(ManagerError::Configuration(
                "Subscribe timeout must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ManagerError::Configuration(
                "Heartbeat interval must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ManagerError::Configuration(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
