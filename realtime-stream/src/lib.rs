//! # realtime-stream
//!
//! A resilient realtime subscription manager for the dealership CRM.
//!
//! One multiplexed channel to the database change stream is shared by any
//! number of independent consumers. The manager keeps that channel alive
//! across network blips and server-side channel errors by reconnecting with
//! jittered exponential backoff and heartbeating the link. When live mode
//! cannot be sustained it falls back to periodic `POLL_UPDATE` cues, telling
//! consumers to re-fetch authoritative state themselves.
//!
//! Delivery is best effort: events in flight during a disconnect may be lost,
//! and consumers are expected to reconcile against their own source of truth.
//!
//! ## Architecture
//!
//! - [`RealtimeManager`]: the facade application code talks to
//! - `connection`: a single worker task owning the channel, timers and state
//! - `dispatcher`: a dedicated thread invoking consumer callbacks in isolation
//! - [`SubscriptionRegistry`], [`HealthTracker`], [`BackoffScheduler`],
//!   [`HeartbeatMonitor`], [`PollingDriver`]: the parts the worker composes
//! - [`ChannelProvider`]: the seam to the realtime backend

pub mod backoff;
pub mod builder;
pub mod config;
mod connection;
mod dispatcher;
pub mod error;
pub mod health;
pub mod heartbeat;
mod listeners;
pub mod logging;
pub mod manager;
pub mod polling;
pub mod provider;
pub mod registry;
pub mod testing;
pub mod types;

pub use backoff::BackoffScheduler;
pub use builder::RealtimeManagerBuilder;
pub use config::{BackoffConfig, ExhaustionPolicy, ManagerConfig};
pub use error::{ConnectionError, ManagerError, ProviderError, Result};
pub use health::{HealthMetrics, HealthStatus, HealthTracker};
pub use heartbeat::HeartbeatMonitor;
pub use listeners::ListenerHandle;
pub use manager::{RealtimeManager, Unsubscribe};
pub use polling::PollingDriver;
pub use provider::{ChannelHandle, ChannelProvider, EventSink, StatusSink};
pub use registry::{Registration, SubscriptionEntry, SubscriptionInfo, SubscriptionRegistry};
pub use types::{
    ChangeEvent, ChangeType, ChannelFilter, ChannelMessage, ChannelStatus, ConnectionListener,
    ConnectionState, ConnectionStatus, EventCallback, EventFilter, Row, SubscriptionConfig,
    SubscriptionFilter,
};
