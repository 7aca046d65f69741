//! The manager facade
//!
//! [`RealtimeManager`] is the only type application code needs. It owns the
//! subscription registry and listener set, hands connection work to the
//! connection worker and never blocks the caller: `subscribe` and
//! `unsubscribe` return immediately while the channel is established in the
//! background.

use std::sync::{Arc, Weak};

use futures::Stream;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::builder::RealtimeManagerBuilder;
use crate::config::ManagerConfig;
use crate::connection::{ActorMessage, Command, ConnectionActor, SharedState};
use crate::dispatcher::{DispatchThread, EventDispatcher};
use crate::error::{ManagerError, Result};
use crate::health::{HealthStatus, HealthTracker};
use crate::listeners::{ListenerHandle, ListenerSet};
use crate::provider::ChannelProvider;
use crate::registry::{SubscriptionInfo, SubscriptionRegistry};
use crate::types::{ConnectionListener, ConnectionState, ConnectionStatus, SubscriptionConfig};

/// Resilient realtime subscription manager
///
/// Cloning is cheap; clones share the same channel and subscriptions. The
/// connection worker stops once the last clone is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use realtime_stream::testing::MockProvider;
/// use realtime_stream::{RealtimeManager, SubscriptionConfig, SubscriptionFilter};
///
/// # async fn example() -> realtime_stream::Result<()> {
/// let manager = RealtimeManager::builder()
///     .with_provider(Arc::new(MockProvider::new()))
///     .build()?;
///
/// let handle = manager.subscribe(SubscriptionConfig::new(
///     "lead-feed",
///     SubscriptionFilter::table("leads"),
///     |event| println!("{} on {}", event.event_type, event.table),
/// ));
///
/// handle.unsubscribe();
/// manager.cleanup().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ManagerConfig,
    registry: Arc<SubscriptionRegistry>,
    listeners: Arc<ListenerSet>,
    health: Arc<Mutex<HealthTracker>>,
    state_rx: watch::Receiver<ConnectionState>,
    commands: mpsc::UnboundedSender<ActorMessage>,
    _dispatch: DispatchThread,
}

impl RealtimeManager {
    /// Create a manager and start its connection worker on the current
    /// tokio runtime.
    ///
    /// No channel is opened until the first subscription is registered.
    pub fn new(config: ManagerConfig, provider: Arc<dyn ChannelProvider>) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| ManagerError::NoRuntime(e.to_string()))?;

        let registry = Arc::new(SubscriptionRegistry::new());
        let listeners = Arc::new(ListenerSet::new());
        let health = Arc::new(Mutex::new(HealthTracker::new()));
        let (state_tx, state_rx) =
            watch::channel(ConnectionState::new(config.max_reconnect_attempts));

        let dispatch = DispatchThread::spawn(EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&listeners),
            config.slow_callback_threshold,
        ))?;

        let (commands, rx) = mpsc::unbounded_channel();
        let actor = ConnectionActor::new(
            config.clone(),
            provider,
            SharedState {
                registry: Arc::clone(&registry),
                health: Arc::clone(&health),
                state_tx,
                deliveries: dispatch.sender(),
            },
            commands.clone(),
        );
        runtime.spawn(actor.run(rx));

        info!(
            channel = %config.channel_name,
            max_reconnect_attempts = config.max_reconnect_attempts,
            "Realtime manager started"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                registry,
                listeners,
                health,
                state_rx,
                commands,
                _dispatch: dispatch,
            }),
        })
    }

    pub fn builder() -> RealtimeManagerBuilder {
        RealtimeManagerBuilder::new()
    }

    /// Register a consumer and make sure the channel is being established.
    ///
    /// Subscribing with an id that is already registered changes nothing and
    /// returns a handle to the existing subscription.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Unsubscribe {
        self.register(config).0
    }

    /// Like [`subscribe`](Self::subscribe), but returns `None` when the id
    /// is already registered.
    pub fn subscribe_unique(&self, config: SubscriptionConfig) -> Option<Unsubscribe> {
        match self.register(config) {
            (handle, true) => Some(handle),
            (_, false) => None,
        }
    }

    fn register(&self, config: SubscriptionConfig) -> (Unsubscribe, bool) {
        let registration = self.inner.registry.add(config);
        let entry = registration.entry();

        if registration.is_new() {
            info!(
                subscription_id = %entry.id(),
                filter = %entry.filter(),
                "Subscription added"
            );
            self.inner.send(Command::EnsureConnected);
        } else {
            debug!(
                subscription_id = %entry.id(),
                "Subscription id already registered, keeping existing subscription"
            );
        }

        let handle = Unsubscribe {
            id: entry.id().to_string(),
            generation: entry.generation(),
            manager: Arc::downgrade(&self.inner),
        };
        (handle, registration.is_new())
    }

    /// Remove a subscription. Returns false if the id was not registered.
    ///
    /// Removing the last subscription tears the channel down.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.inner.unsubscribe(id, None)
    }

    /// Observe connection state transitions.
    ///
    /// The listener is called right away with the current snapshot, then
    /// once for every later transition, from the dispatch thread.
    pub fn add_connection_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let listener: ConnectionListener = Arc::new(listener);
        let floor = self.inner.state_rx.borrow().revision;
        let id = self.inner.listeners.insert(listener, floor);

        // Skipped if the dispatch thread already delivered this revision.
        let current = self.connection_state();
        self.inner.listeners.notify_one(id, &current);

        ListenerHandle::new(id, &self.inner.listeners)
    }

    /// Abandon the current connection attempt, timers and polling, and
    /// connect again immediately with a fresh attempt budget.
    pub fn force_reconnect(&self) {
        self.inner.send(Command::ForceReconnect);
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let metrics = self.inner.health.lock().status();
        HealthStatus::new(
            &metrics,
            self.inner.registry.len(),
            self.inner.state_rx.borrow().status,
        )
    }

    /// Zero the health counters.
    pub fn reset_health(&self) {
        self.inner.health.lock().reset();
    }

    /// Drop every subscription and listener, release the channel and return
    /// to idle. Safe to call any number of times.
    ///
    /// No callback runs after this returns.
    pub async fn cleanup(&self) {
        let removed = self.inner.registry.clear();
        self.inner.listeners.clear();

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inner.send(Command::Teardown { ack: Some(ack_tx) }) {
            let _ = ack_rx.await;
        }

        info!(removed, "Realtime manager cleaned up");
    }

    /// Wait until every event and state change the worker has seen so far
    /// has been delivered.
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if !self.inner.send(Command::Barrier(done_tx)) {
            return Err(ManagerError::WorkerStopped);
        }
        done_rx.await.map_err(|_| ManagerError::WorkerStopped)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state_rx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state_rx.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state_rx.borrow().is_connected
    }

    /// A watch receiver that always holds the latest snapshot
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Stream of snapshots published after this call.
    ///
    /// Intermediate snapshots may be skipped if the consumer falls behind;
    /// use a connection listener to see every transition.
    pub fn state_changes(&self) -> impl Stream<Item = ConnectionState> + Send + 'static {
        let mut rx = self.inner.state_rx.clone();
        let _ = rx.borrow_and_update();

        futures::stream::unfold(rx, |mut rx| async move {
            rx.changed().await.ok()?;
            let state = rx.borrow_and_update().clone();
            Some((state, rx))
        })
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.registry.info()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for RealtimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("channel", &self.inner.config.channel_name)
            .field("status", &self.status())
            .field("subscriptions", &self.subscription_count())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

impl ManagerInner {
    fn send(&self, command: Command) -> bool {
        let sent = self.commands.send(ActorMessage::Command(command)).is_ok();
        if !sent {
            warn!("Connection worker has stopped, command dropped");
        }
        sent
    }

    fn unsubscribe(&self, id: &str, generation: Option<u64>) -> bool {
        let Some(entry) = self.registry.remove(id, generation) else {
            debug!(subscription_id = %id, "Unsubscribe for unknown subscription");
            return false;
        };

        info!(
            subscription_id = %entry.id(),
            delivered = entry.delivered(),
            "Subscription removed"
        );

        if self.registry.is_empty() {
            self.send(Command::ReleaseIfUnused);
        }
        true
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let _ = self.commands.send(ActorMessage::Command(Command::Shutdown));
    }
}

/// Handle returned by [`RealtimeManager::subscribe`]
///
/// Only removes the registration it was issued for: once that subscription
/// is gone, a newer one reusing the id is left alone.
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    id: String,
    generation: u64,
    manager: Weak<ManagerInner>,
}

impl Unsubscribe {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns false if the subscription was already removed.
    pub fn unsubscribe(&self) -> bool {
        self.manager
            .upgrade()
            .map_or(false, |manager| manager.unsubscribe(&self.id, Some(self.generation)))
    }
}
