//! Blocking iterators over change events and connection states
//!
//! Each stream owns the registration it was created for: dropping an
//! [`EventStream`] unsubscribes, dropping a [`StateStream`] removes its
//! connection listener.

use std::sync::mpsc;
use std::time::Duration;

use realtime_stream::{ChangeEvent, ConnectionState, ListenerHandle, Unsubscribe};

/// Blocking iterator over the events delivered to one subscription
///
/// `next()` blocks until an event arrives and returns `None` once the
/// subscription has been removed, e.g. by `cleanup()`.
pub struct EventStream {
    rx: mpsc::Receiver<ChangeEvent>,
    handle: Unsubscribe,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<ChangeEvent>, handle: Unsubscribe) -> Self {
        Self { rx, handle }
    }

    /// The subscription id this stream was registered under
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// Block until an event is available
    ///
    /// Returns `None` if the subscription is gone.
    pub fn recv(&self) -> Option<ChangeEvent> {
        self.rx.recv().ok()
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Block until an event is available or timeout expires
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking iterator over the events already delivered
    pub fn try_iter(&self) -> impl Iterator<Item = ChangeEvent> + '_ {
        self.rx.try_iter()
    }

    /// Remove the subscription now instead of on drop
    pub fn unsubscribe(self) -> bool {
        self.handle.unsubscribe()
    }
}

impl Iterator for EventStream {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

/// Blocking iterator over connection state snapshots
///
/// The first item is the state at the time the stream was created.
pub struct StateStream {
    rx: mpsc::Receiver<ConnectionState>,
    listener: ListenerHandle,
}

impl StateStream {
    pub(crate) fn new(rx: mpsc::Receiver<ConnectionState>, listener: ListenerHandle) -> Self {
        Self { rx, listener }
    }

    pub fn recv(&self) -> Option<ConnectionState> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<ConnectionState> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ConnectionState> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_iter(&self) -> impl Iterator<Item = ConnectionState> + '_ {
        self.rx.try_iter()
    }
}

impl Iterator for StateStream {
    type Item = ConnectionState;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl Drop for StateStream {
    fn drop(&mut self) {
        self.listener.remove();
    }
}
