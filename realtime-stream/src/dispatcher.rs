//! Event dispatch to registered consumers
//!
//! Change events, polling cues and connection state snapshots are queued by
//! the connection worker and delivered on a dedicated dispatch thread, so a
//! slow consumer never stalls heartbeats or reconnects. Each callback is
//! isolated: a panic is caught and logged and delivery continues with the
//! next consumer.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::listeners::ListenerSet;
use crate::registry::{SubscriptionEntry, SubscriptionRegistry};
use crate::types::{ChangeEvent, ConnectionListener, ConnectionState};

/// Work item for the dispatch thread
#[derive(Debug)]
pub(crate) enum Delivery {
    /// A change event received from the channel
    Change(ChangeEvent),
    /// Synthesize a polling cue for every subscription
    Poll,
    /// A connection state transition
    State(ConnectionState),
    /// Signalled once everything queued before it has been delivered
    Barrier(oneshot::Sender<()>),
}

pub(crate) struct EventDispatcher {
    registry: Arc<SubscriptionRegistry>,
    listeners: Arc<ListenerSet>,
    slow_callback_threshold: Duration,
}

impl EventDispatcher {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        listeners: Arc<ListenerSet>,
        slow_callback_threshold: Duration,
    ) -> Self {
        Self {
            registry,
            listeners,
            slow_callback_threshold,
        }
    }

    pub(crate) fn handle(&self, delivery: Delivery) {
        match delivery {
            Delivery::Change(event) => {
                self.dispatch(&event);
            }
            Delivery::Poll => {
                self.dispatch_poll();
            }
            Delivery::State(state) => {
                self.notify_listeners(&state);
            }
            Delivery::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    /// Deliver an event to every matching subscription in registration order.
    ///
    /// Returns the number of callbacks that completed without panicking.
    pub(crate) fn dispatch(&self, event: &ChangeEvent) -> usize {
        let targets = self.registry.matching(event);
        if targets.is_empty() {
            trace!(
                table = %event.table,
                event_type = %event.event_type,
                "No subscription matches event"
            );
            return 0;
        }

        targets
            .iter()
            .filter(|entry| self.invoke(entry, event))
            .count()
    }

    /// Deliver a `POLL_UPDATE` cue for its own table to every subscription.
    pub(crate) fn dispatch_poll(&self) -> usize {
        let targets = self.registry.snapshot();
        debug!(subscriptions = targets.len(), "Delivering polling cues");

        targets
            .iter()
            .filter(|entry| {
                let filter = entry.filter();
                let cue = ChangeEvent::poll_update(filter.schema.clone(), filter.table.clone());
                self.invoke(entry, &cue)
            })
            .count()
    }

    pub(crate) fn notify_listeners(&self, state: &ConnectionState) -> usize {
        self.listeners.notify_all(state)
    }

    fn invoke(&self, entry: &SubscriptionEntry, event: &ChangeEvent) -> bool {
        let callback = entry.callback();
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
        let elapsed = started.elapsed();

        if elapsed > self.slow_callback_threshold {
            warn!(
                subscription_id = %entry.id(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow subscription callback"
            );
        }

        match outcome {
            Ok(()) => {
                entry.mark_delivered();
                true
            }
            Err(payload) => {
                error!(
                    subscription_id = %entry.id(),
                    table = %event.table,
                    event_type = %event.event_type,
                    panic = %panic_message(payload.as_ref()),
                    "Subscription callback panicked"
                );
                false
            }
        }
    }
}

/// Invoke one connection listener, containing any panic.
pub(crate) fn notify_listener(listener: &ConnectionListener, state: &ConnectionState) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(state))) {
        error!(
            status = %state.status,
            panic = %panic_message(payload.as_ref()),
            "Connection listener panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Dedicated OS thread draining the delivery queue.
///
/// The thread exits once every sender has been dropped.
pub(crate) struct DispatchThread {
    sender: Sender<Delivery>,
    _handle: thread::JoinHandle<()>,
}

impl DispatchThread {
    pub(crate) fn spawn(dispatcher: EventDispatcher) -> std::io::Result<Self> {
        let (sender, receiver) = channel::unbounded::<Delivery>();

        let handle = thread::Builder::new()
            .name("realtime-dispatch".to_string())
            .spawn(move || {
                debug!("Dispatch thread started");
                for delivery in receiver.iter() {
                    dispatcher.handle(delivery);
                }
                debug!("Dispatch thread stopped");
            })?;

        Ok(Self {
            sender,
            _handle: handle,
        })
    }

    pub(crate) fn sender(&self) -> Sender<Delivery> {
        self.sender.clone()
    }
}
