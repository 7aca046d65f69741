//! Blocking realtime event manager
//!
//! Provides a fully synchronous API over [`RealtimeManager`]. The async
//! machinery runs on a background worker thread.

use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;

use realtime_stream::{
    ChannelProvider, ConnectionState, ConnectionStatus, HealthStatus, ManagerConfig,
    RealtimeManager, SubscriptionConfig, SubscriptionFilter,
};
use tokio::sync::mpsc;

use crate::error::{EventManagerError, Result};
use crate::iter::{EventStream, StateStream};
use crate::worker::{spawn_event_worker, Command};

/// Blocking facade over the realtime subscription manager
///
/// # Example
///
/// ```rust,ignore
/// use realtime_event_manager::RealtimeEventManager;
/// use realtime_stream::SubscriptionFilter;
///
/// let manager = RealtimeEventManager::new(provider)?;
///
/// for event in manager.subscribe("lead-board", SubscriptionFilter::table("leads"))? {
///     if event.is_poll_update() {
///         // re-fetch leads
///     }
/// }
/// ```
///
/// Must not be cleaned up or flushed from inside a subscription callback or
/// connection listener: those run on the thread these calls wait for.
pub struct RealtimeEventManager {
    manager: RealtimeManager,

    /// Send commands to background worker
    command_tx: mpsc::UnboundedSender<Command>,

    /// Background worker handle (kept alive)
    _worker: JoinHandle<()>,
}

impl RealtimeEventManager {
    /// Create a manager with the default configuration
    pub fn new(provider: Arc<dyn ChannelProvider>) -> Result<Self> {
        Self::with_config(ManagerConfig::default(), provider)
    }

    /// Create a manager with a custom configuration
    ///
    /// Blocks until the background worker is running.
    pub fn with_config(config: ManagerConfig, provider: Arc<dyn ChannelProvider>) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (manager, worker) = spawn_event_worker(config, provider, command_rx)?;

        Ok(Self {
            manager,
            command_tx,
            _worker: worker,
        })
    }

    /// Subscribe to the changes matching `filter`.
    ///
    /// Unlike the async manager, a duplicate id is an error here: the
    /// existing subscription's events are already flowing into another
    /// stream.
    pub fn subscribe(&self, id: impl Into<String>, filter: SubscriptionFilter) -> Result<EventStream> {
        let id = id.into();
        let (tx, rx) = std_mpsc::channel();

        let config = SubscriptionConfig::new(id.clone(), filter, move |event| {
            let _ = tx.send(event.clone());
        });

        match self.manager.subscribe_unique(config) {
            Some(handle) => {
                tracing::debug!("Subscribed '{}'", id);
                Ok(EventStream::new(rx, handle))
            }
            None => Err(EventManagerError::DuplicateSubscription(id)),
        }
    }

    /// Remove a subscription by id. Its stream ends.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.manager.unsubscribe(id)
    }

    /// Stream of connection state snapshots, starting with the current one
    pub fn state_changes(&self) -> StateStream {
        let (tx, rx) = std_mpsc::channel();
        let listener = self.manager.add_connection_listener(move |state| {
            let _ = tx.send(state.clone());
        });
        StateStream::new(rx, listener)
    }

    pub fn force_reconnect(&self) {
        self.manager.force_reconnect();
    }

    pub fn health(&self) -> HealthStatus {
        self.manager.get_health_status()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.connection_state()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    pub fn subscription_count(&self) -> usize {
        self.manager.subscription_count()
    }

    /// Block until everything received so far has been delivered
    pub fn flush(&self) -> Result<()> {
        let (reply, done) = std_mpsc::sync_channel(1);
        self.command_tx
            .send(Command::Flush { reply })
            .map_err(|_| EventManagerError::WorkerDisconnected)?;

        match done.recv() {
            Ok(true) => Ok(()),
            _ => Err(EventManagerError::WorkerDisconnected),
        }
    }

    /// Drop every subscription and listener and release the channel.
    ///
    /// All open streams end. Safe to call more than once.
    pub fn cleanup(&self) -> Result<()> {
        let (reply, done) = std_mpsc::sync_channel(1);
        self.command_tx
            .send(Command::Cleanup { reply })
            .map_err(|_| EventManagerError::WorkerDisconnected)?;

        done.recv().map_err(|_| EventManagerError::WorkerDisconnected)
    }

    /// The underlying async manager
    pub fn manager(&self) -> &RealtimeManager {
        &self.manager
    }
}

impl Drop for RealtimeEventManager {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}
