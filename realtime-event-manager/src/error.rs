use realtime_stream::ManagerError;
use thiserror::Error;

/// Errors that can occur in the blocking event manager
#[derive(Error, Debug)]
pub enum EventManagerError {
    /// The underlying realtime manager could not be created
    #[error("Failed to start realtime manager: {0}")]
    Manager(#[from] ManagerError),

    /// The background worker thread could not be started
    #[error("Failed to start event worker: {0}")]
    WorkerStart(String),

    /// A subscription with this id is already registered
    #[error("Subscription '{0}' is already registered")]
    DuplicateSubscription(String),

    /// The background worker has stopped
    #[error("Event worker disconnected")]
    WorkerDisconnected,
}

/// Result type for event manager operations
pub type Result<T> = std::result::Result<T, EventManagerError>;
