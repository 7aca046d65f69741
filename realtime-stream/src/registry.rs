//! Subscription registration with duplicate protection
//!
//! This module provides thread-safe registration of consumer subscriptions,
//! keyed by the caller-chosen id and kept in registration order so the
//! dispatcher can deliver to consumers in the order they subscribed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::types::{ChangeEvent, EventCallback, SubscriptionConfig, SubscriptionFilter};

/// A registered consumer
pub struct SubscriptionEntry {
    id: String,
    filter: SubscriptionFilter,
    callback: EventCallback,
    generation: u64,
    created_at: DateTime<Utc>,
    delivered: AtomicU64,
}

impl SubscriptionEntry {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    /// Registration number, unique across the lifetime of the registry
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of events handed to this consumer so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.filter.matches(event)
    }

    pub(crate) fn callback(&self) -> &EventCallback {
        &self.callback
    }

    pub(crate) fn mark_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id.clone(),
            filter: self.filter.clone(),
            generation: self.generation,
            created_at: self.created_at,
            delivered: self.delivered(),
        }
    }
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Diagnostic view of a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub filter: SubscriptionFilter,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub delivered: u64,
}

/// Outcome of [`SubscriptionRegistry::add`]
#[derive(Debug, Clone)]
pub enum Registration {
    /// A new entry was stored
    Added(Arc<SubscriptionEntry>),
    /// The id was already registered; the existing entry is returned untouched
    Existing(Arc<SubscriptionEntry>),
}

impl Registration {
    pub fn entry(&self) -> &Arc<SubscriptionEntry> {
        match self {
            Registration::Added(entry) | Registration::Existing(entry) => entry,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Registration::Added(_))
    }
}

/// Thread-safe, ordered registry of subscriptions
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<Arc<SubscriptionEntry>>>,
    next_generation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Register a subscription, or return the existing one with the same id
    pub fn add(&self, config: SubscriptionConfig) -> Registration {
        let mut entries = self.entries.write();

        if let Some(existing) = entries.iter().find(|entry| entry.id == config.id) {
            return Registration::Existing(Arc::clone(existing));
        }

        let entry = Arc::new(SubscriptionEntry {
            id: config.id,
            filter: config.filter,
            callback: config.callback,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            created_at: Utc::now(),
            delivered: AtomicU64::new(0),
        });
        entries.push(Arc::clone(&entry));

        Registration::Added(entry)
    }

    /// Remove a subscription by id
    ///
    /// With `Some(generation)` the entry is only removed if it is the
    /// registration that generation was issued for, so a stale handle cannot
    /// remove a newer subscription that reused the id.
    pub fn remove(&self, id: &str, generation: Option<u64>) -> Option<Arc<SubscriptionEntry>> {
        let mut entries = self.entries.write();
        let position = entries.iter().position(|entry| {
            entry.id == id && generation.map_or(true, |expected| entry.generation == expected)
        })?;
        Some(entries.remove(position))
    }

    pub fn get(&self, id: &str) -> Option<Arc<SubscriptionEntry>> {
        self.entries.read().iter().find(|entry| entry.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().iter().any(|entry| entry.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Remove every subscription, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    /// All entries in registration order
    pub fn snapshot(&self) -> Vec<Arc<SubscriptionEntry>> {
        self.entries.read().clone()
    }

    /// Entries whose filter matches the event, in registration order
    pub fn matching(&self, event: &ChangeEvent) -> Vec<Arc<SubscriptionEntry>> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.matches(event))
            .cloned()
            .collect()
    }

    pub fn info(&self) -> Vec<SubscriptionInfo> {
        self.entries.read().iter().map(|entry| entry.info()).collect()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
