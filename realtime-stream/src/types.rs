//! Core types for the realtime-stream crate.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A database row as delivered by the change stream.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Callback invoked for every change event matching a subscription.
pub type EventCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync + 'static>;

/// Callback invoked with every connection state snapshot.
pub type ConnectionListener = Arc<dyn Fn(&ConnectionState) + Send + Sync + 'static>;

/// Kind of change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// A row was inserted
    Insert,
    /// A row was updated
    Update,
    /// A row was deleted
    Delete,
    /// Synthetic cue emitted while polling: re-fetch authoritative state
    PollUpdate,
}

impl ChangeType {
    /// Wire name of the change type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
            ChangeType::PollUpdate => "POLL_UPDATE",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-type part of a subscription filter.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Default)]
pub enum EventFilter {
    #[serde(rename = "insert")]
    Insert,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "delete")]
    Delete,
    /// Matches every change type
    #[default]
    #[serde(rename = "*")]
    All,
}

impl EventFilter {
    /// Whether a change of the given type passes this filter.
    pub fn matches(&self, change: ChangeType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Insert => change == ChangeType::Insert,
            EventFilter::Update => change == ChangeType::Update,
            EventFilter::Delete => change == ChangeType::Delete,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::Insert => "insert",
            EventFilter::Update => "update",
            EventFilter::Delete => "delete",
            EventFilter::All => "*",
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(EventFilter::Insert),
            "update" => Ok(EventFilter::Update),
            "delete" => Ok(EventFilter::Delete),
            "*" => Ok(EventFilter::All),
            other => Err(format!("unknown event filter: {other}")),
        }
    }
}

/// Which changes a subscription is interested in.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub event: EventFilter,
    pub schema: String,
    pub table: String,
}

impl SubscriptionFilter {
    /// Create a filter for one event type on `schema.table`.
    pub fn new(event: EventFilter, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            event,
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Every change on a table in the `public` schema.
    pub fn table(table: impl Into<String>) -> Self {
        Self::new(EventFilter::All, "public", table)
    }

    /// Narrow the filter to a single event type.
    pub fn with_event(mut self, event: EventFilter) -> Self {
        self.event = event;
        self
    }

    /// Event type `*` matches any change; schema and table must match exactly.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.event.matches(event.event_type) && self.schema == event.schema && self.table == event.table
    }
}

impl fmt::Display for SubscriptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.event, self.schema, self.table)
    }
}

/// Scope requested from the channel provider when the channel is opened.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelFilter {
    pub event: EventFilter,
    pub schema: String,
    /// `None` watches every table in the schema
    pub table: Option<String>,
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self {
            event: EventFilter::All,
            schema: "public".to_string(),
            table: None,
        }
    }
}

/// A row change notification, or a synthesized polling cue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: ChangeType,
    pub schema: String,
    pub table: String,
    pub new: Option<Row>,
    pub old: Option<Row>,
    /// Stamped by the manager when the event arrives from the channel
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(event_type: ChangeType, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            event_type,
            schema: schema.into(),
            table: table.into(),
            new: None,
            old: None,
            received_at: Utc::now(),
        }
    }

    /// Polling cue for a table: carries no row data.
    pub fn poll_update(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(ChangeType::PollUpdate, schema, table)
    }

    pub fn with_new(mut self, row: Row) -> Self {
        self.new = Some(row);
        self
    }

    pub fn with_old(mut self, row: Row) -> Self {
        self.old = Some(row);
        self
    }

    pub fn is_poll_update(&self) -> bool {
        self.event_type == ChangeType::PollUpdate
    }
}

/// Lifecycle status of the shared channel.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Polling,
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Polling => "polling",
            ConnectionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of the connection state.
///
/// Only the connection worker produces these; everything else reads them.
/// `is_connected` is true exactly when `status` is [`ConnectionStatus::Connected`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Monotonic transition counter, incremented on every published snapshot
    pub revision: u64,
}

impl ConnectionState {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            is_connected: false,
            status: ConnectionStatus::Idle,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            last_connected_at: None,
            last_error: None,
            revision: 0,
        }
    }
}

/// Status notifications a channel provider reports for a channel.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    ChannelError,
    TimedOut,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Subscribed => "SUBSCRIBED",
            ChannelStatus::Closed => "CLOSED",
            ChannelStatus::ChannelError => "CHANNEL_ERROR",
            ChannelStatus::TimedOut => "TIMED_OUT",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, ChannelStatus::Subscribed)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound message sent over an open channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub reference: String,
}

impl ChannelMessage {
    pub const HEARTBEAT: &'static str = "heartbeat";

    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
            reference: Uuid::new_v4().to_string(),
        }
    }

    /// Liveness probe with no business meaning.
    pub fn heartbeat() -> Self {
        Self::new(Self::HEARTBEAT, serde_json::Value::Object(Row::new()))
    }

    pub fn is_heartbeat(&self) -> bool {
        self.event == Self::HEARTBEAT
    }
}

/// Registration request passed to `RealtimeManager::subscribe`.
#[derive(Clone)]
pub struct SubscriptionConfig {
    /// Caller-chosen unique id
    pub id: String,
    pub filter: SubscriptionFilter,
    pub callback: EventCallback,
}

impl SubscriptionConfig {
    pub fn new<F>(id: impl Into<String>, filter: SubscriptionFilter, callback: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            filter,
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
