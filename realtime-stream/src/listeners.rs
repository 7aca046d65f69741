//! Connection listener bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::dispatcher;
use crate::types::{ConnectionListener, ConnectionState};

/// One registered listener.
///
/// `seen` is held for the whole call, so a listener is never entered from
/// two threads at once and never handed an older snapshot after a newer one.
struct ListenerSlot {
    listener: ConnectionListener,
    /// Snapshots older than the one current at registration are skipped
    floor: u64,
    /// Highest snapshot revision this listener has been handed
    seen: Mutex<Option<u64>>,
}

impl ListenerSlot {
    fn deliver(&self, state: &ConnectionState) -> bool {
        if state.revision < self.floor {
            return false;
        }

        let mut seen = self.seen.lock();
        if seen.map_or(false, |seen| state.revision <= seen) {
            return false;
        }
        *seen = Some(state.revision);
        dispatcher::notify_listener(&self.listener, state);
        true
    }
}

/// Set of connection listeners, notified from the dispatch thread.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: DashMap<u64, Arc<ListenerSlot>>,
    next_id: AtomicU64,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a listener that skips snapshots older than `floor`.
    pub(crate) fn insert(&self, listener: ConnectionListener, floor: u64) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(
            id,
            Arc::new(ListenerSlot {
                listener,
                floor,
                seen: Mutex::new(None),
            }),
        );
        id
    }

    /// Hand `state` to one listener unless it has already seen it or a
    /// newer snapshot. Returns whether the listener was called.
    pub(crate) fn notify_one(&self, id: u64, state: &ConnectionState) -> bool {
        let slot = self.listeners.get(&id).map(|entry| Arc::clone(entry.value()));
        slot.map_or(false, |slot| slot.deliver(state))
    }

    /// Hand `state` to every listener that has not seen it yet.
    /// Returns the number of listeners called.
    ///
    /// Slots are cloned out of the map first so a listener may add or remove
    /// listeners without deadlocking on a shard lock.
    pub(crate) fn notify_all(&self, state: &ConnectionState) -> usize {
        let slots: Vec<Arc<ListenerSlot>> = self
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        slots.iter().filter(|slot| slot.deliver(state)).count()
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub(crate) fn clear(&self) {
        self.listeners.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}

/// Handle returned by `RealtimeManager::add_connection_listener`.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<ListenerSet>,
}

impl ListenerHandle {
    pub(crate) fn new(id: u64, listeners: &Arc<ListenerSet>) -> Self {
        Self {
            id,
            listeners: Arc::downgrade(listeners),
        }
    }

    /// Stop notifying this listener. Returns false if it was already removed.
    pub fn remove(&self) -> bool {
        self.listeners
            .upgrade()
            .map_or(false, |listeners| listeners.remove(self.id))
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
