//! Channel provider abstraction
//!
//! The manager never talks to a realtime backend directly. A
//! [`ChannelProvider`] opens the single multiplexed channel and pushes change
//! events and status notifications back through the sinks it is handed.
//! Sinks are tagged with the generation of the channel they belong to, so
//! anything a torn-down channel reports afterwards is ignored.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::connection::{ActorMessage, ChannelSignal};
use crate::error::ProviderError;
use crate::types::{ChangeEvent, ChannelFilter, ChannelMessage, ChannelStatus};

/// Opens channels on a realtime backend
#[async_trait]
pub trait ChannelProvider: Send + Sync + 'static {
    /// Open a channel scoped by `filter`.
    ///
    /// Change events received on the channel must be forwarded to `events`.
    async fn open(
        &self,
        name: &str,
        filter: &ChannelFilter,
        events: EventSink,
    ) -> Result<Box<dyn ChannelHandle>, ProviderError>;

    /// Release a channel. Called at most once per opened handle.
    async fn close(&self, handle: Box<dyn ChannelHandle>);
}

/// An open channel
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Issue the subscribe request.
    ///
    /// Returning `Ok` only means the request was sent; the acknowledgement
    /// (or failure) arrives later through `status`.
    async fn subscribe(&mut self, status: StatusSink) -> Result<(), ProviderError>;

    /// Send a message over the channel
    async fn send(&self, message: ChannelMessage) -> Result<(), ProviderError>;

    fn channel_name(&self) -> &str;
}

/// Forwards change events from a provider to the connection worker
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ActorMessage>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ActorMessage>, generation: u64) -> Self {
        Self { tx, generation }
    }

    /// Returns false once the manager has shut down.
    pub fn send(&self, event: ChangeEvent) -> bool {
        self.tx
            .send(ActorMessage::Channel {
                generation: self.generation,
                signal: ChannelSignal::Event(event),
            })
            .is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Forwards channel status notifications from a provider to the connection worker
#[derive(Debug, Clone)]
pub struct StatusSink {
    tx: mpsc::UnboundedSender<ActorMessage>,
    generation: u64,
}

impl StatusSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ActorMessage>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn send(&self, status: ChannelStatus) -> bool {
        self.signal(status, None)
    }

    /// Report a status along with the provider's explanation
    pub fn send_with_reason(&self, status: ChannelStatus, reason: impl Into<String>) -> bool {
        self.signal(status, Some(reason.into()))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn signal(&self, status: ChannelStatus, reason: Option<String>) -> bool {
        self.tx
            .send(ActorMessage::Channel {
                generation: self.generation,
                signal: ChannelSignal::Status { status, reason },
            })
            .is_ok()
    }
}
