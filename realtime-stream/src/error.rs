//! Error types for the realtime-stream crate.

use std::time::Duration;

use crate::types::ChannelStatus;

/// Errors returned by the manager facade.
///
/// Transport failures never surface here; they are absorbed by the connection
/// worker and reported as state transitions and health metrics.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The manager was created outside a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The dispatch thread could not be started
    #[error("Failed to start dispatch thread: {0}")]
    DispatchThread(#[from] std::io::Error),

    /// The connection worker is no longer running
    #[error("Connection worker has stopped")]
    WorkerStopped,
}

/// Why a connection attempt failed or a live channel was lost.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The provider could not establish the channel
    #[error("Failed to open channel: {0}")]
    TransportOpen(String),

    /// No acknowledgement arrived within the subscribe timeout
    #[error("No subscription acknowledgement within {0:?}")]
    SubscribeTimeout(Duration),

    /// The provider reported the channel closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The provider reported a channel error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The liveness probe could not be sent
    #[error("Heartbeat failed: {0}")]
    HeartbeatFailed(String),
}

impl ConnectionError {
    /// Map a failing provider status to a connection error.
    pub fn from_status(status: ChannelStatus, reason: Option<String>) -> Self {
        let reason = reason.unwrap_or_else(|| status.to_string());
        match status {
            ChannelStatus::Closed => ConnectionError::ChannelClosed(reason),
            ChannelStatus::TimedOut => ConnectionError::ChannelError(format!("timed out: {reason}")),
            ChannelStatus::ChannelError | ChannelStatus::Subscribed => {
                ConnectionError::ChannelError(reason)
            }
        }
    }
}

/// Errors reported by a channel provider implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The channel could not be opened
    #[error("Failed to open channel '{channel}': {reason}")]
    Open { channel: String, reason: String },

    /// The subscribe request could not be issued
    #[error("Subscribe request failed: {0}")]
    Subscribe(String),

    /// A message could not be sent over the channel
    #[error("Send failed: {0}")]
    Send(String),

    /// The channel has already been closed
    #[error("Channel is closed")]
    Closed,
}

impl From<ProviderError> for ConnectionError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Closed => ConnectionError::ChannelClosed("channel is closed".to_string()),
            other => ConnectionError::TransportOpen(other.to_string()),
        }
    }
}

/// Convenience type alias for Results using ManagerError.
pub type Result<T> = std::result::Result<T, ManagerError>;
