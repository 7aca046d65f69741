//! Builder for creating and configuring the RealtimeManager.
//!
//! The `RealtimeManagerBuilder` provides a fluent API for configuring and
//! creating a `RealtimeManager`. Configuration is validated when `build()` is
//! called.
//!
//! # Example
//!
//! ```rust,ignore
//! use realtime_stream::{ExhaustionPolicy, RealtimeManagerBuilder};
//! use std::time::Duration;
//!
//! let manager = RealtimeManagerBuilder::new()
//!     .with_provider(provider)
//!     .with_channel("crm-realtime")
//!     .with_max_reconnect_attempts(5)
//!     .with_backoff(Duration::from_secs(1), Duration::from_secs(30))
//!     .with_exhaustion_policy(ExhaustionPolicy::Poll)
//!     .build()?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackoffConfig, ExhaustionPolicy, ManagerConfig};
use crate::error::{ManagerError, Result};
use crate::manager::RealtimeManager;
use crate::provider::ChannelProvider;
use crate::types::ChannelFilter;

/// Builder for creating and configuring a RealtimeManager.
///
/// # Validation
///
/// `build()` fails when:
/// - No channel provider was set
/// - The configuration does not pass [`ManagerConfig::validate`]
/// - It is called outside a tokio runtime
#[derive(Default)]
pub struct RealtimeManagerBuilder {
    provider: Option<Arc<dyn ChannelProvider>>,
    config: ManagerConfig,
}

impl RealtimeManagerBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the channel provider. Required.
    pub fn with_provider(mut self, provider: Arc<dyn ChannelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replace the whole configuration, e.g. with a preset such as
    /// [`ManagerConfig::fast_recovery`].
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the channel name and the scope requested when opening it.
    pub fn with_channel(mut self, name: impl Into<String>) -> Self {
        self.config.channel_name = name.into();
        self
    }

    pub fn with_channel_filter(mut self, filter: ChannelFilter) -> Self {
        self.config.channel_filter = filter;
        self
    }

    /// Set how many consecutive failed attempts are made before giving up on
    /// live mode.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Set the backoff base delay and cap.
    ///
    /// # Parameters
    ///
    /// * `base` - Delay before the first retry
    /// * `cap` - Upper bound on the exponential part of the delay
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.config.backoff = BackoffConfig {
            base,
            cap,
            ..self.config.backoff
        };
        self
    }

    /// Set the upper bound of the random jitter added to every delay.
    /// `Duration::ZERO` makes delays deterministic.
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.config.backoff.max_jitter = max_jitter;
        self
    }

    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.config.subscribe_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Choose between polling and the `failed` state once reconnect
    /// attempts are exhausted.
    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.config.exhaustion_policy = policy;
        self
    }

    pub fn with_slow_callback_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_callback_threshold = threshold;
        self
    }

    /// Build the manager and start its connection worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<RealtimeManager> {
        let provider = self.provider.ok_or_else(|| {
            ManagerError::Configuration("A channel provider is required".to_string())
        })?;

        RealtimeManager::new(self.config, provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[test]
    fn test_builder_applies_settings() {
        let builder = RealtimeManagerBuilder::new()
            .with_channel("dealer-42")
            .with_max_reconnect_attempts(3)
            .with_backoff(Duration::from_millis(100), Duration::from_secs(2))
            .with_jitter(Duration::ZERO)
            .with_poll_interval(Duration::from_secs(5))
            .with_exhaustion_policy(ExhaustionPolicy::Fail);

        assert_eq!(builder.config.channel_name, "dealer-42");
        assert_eq!(builder.config.max_reconnect_attempts, 3);
        assert_eq!(builder.config.backoff.base, Duration::from_millis(100));
        assert_eq!(builder.config.backoff.cap, Duration::from_secs(2));
        assert_eq!(builder.config.backoff.max_jitter, Duration::ZERO);
        assert_eq!(builder.config.poll_interval, Duration::from_secs(5));
        assert_eq!(builder.config.exhaustion_policy, ExhaustionPolicy::Fail);
    }

    #[tokio::test]
    async fn test_build_requires_provider() {
        let result = RealtimeManagerBuilder::new().build();
        assert!(matches!(result, Err(ManagerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_build_validates_config() {
        let result = RealtimeManagerBuilder::new()
            .with_provider(Arc::new(MockProvider::new()))
            .with_max_reconnect_attempts(0)
            .build();
        assert!(matches!(result, Err(ManagerError::Configuration(_))));
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = RealtimeManagerBuilder::new()
            .with_provider(Arc::new(MockProvider::new()))
            .build();
        assert!(matches!(result, Err(ManagerError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_build_starts_idle() {
        let manager = RealtimeManagerBuilder::new()
            .with_provider(Arc::new(MockProvider::new()))
            .build()
            .unwrap();

        let state = manager.connection_state();
        assert_eq!(state.status, crate::types::ConnectionStatus::Idle);
        assert!(!state.is_connected);
        assert_eq!(manager.subscription_count(), 0);
    }
}
