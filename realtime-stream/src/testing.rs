//! In-memory channel provider and helpers for exercising the manager in tests.
//!
//! [`MockProvider`] plays the backend: each connection attempt consumes one
//! scripted [`SubscribeOutcome`], and the test pushes change events and
//! channel statuses into whichever channel is currently open.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ProviderError;
use crate::manager::RealtimeManager;
use crate::provider::{ChannelHandle, ChannelProvider, EventSink, StatusSink};
use crate::types::{ChangeEvent, ChangeType, ChannelFilter, ChannelMessage, ChannelStatus, ConnectionStatus};

/// How the mock backend answers one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeOutcome {
    /// Acknowledge with `SUBSCRIBED`
    #[default]
    Acknowledge,
    /// Answer the subscribe request with the given status
    Reply(ChannelStatus),
    /// Never answer, so the attempt runs into the subscribe timeout
    Silent,
    /// Fail to open the channel
    FailOpen,
    /// Open the channel but fail to issue the subscribe request
    FailSubscribe,
    /// Never finish opening the channel
    StallOpen,
    /// Open the channel but never finish the subscribe request
    StallSubscribe,
}

/// Scripted in-memory channel provider
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<SubscribeOutcome>>,
    default_outcome: Mutex<SubscribeOutcome>,
    live: Mutex<Option<LiveChannel>>,
    /// The channel most recently released, with its sinks still attached
    retired: Mutex<Option<LiveChannel>>,
    sent: Mutex<Vec<ChannelMessage>>,
    filters: Mutex<Vec<ChannelFilter>>,
    fail_sends: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    next_channel: AtomicU64,
}

struct LiveChannel {
    id: u64,
    events: EventSink,
    status: Option<StatusSink>,
}

impl MockProvider {
    /// A provider that acknowledges every attempt
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next connection attempts, in order.
    /// Once the script runs out the default outcome applies.
    pub fn script(&self, outcomes: impl IntoIterator<Item = SubscribeOutcome>) {
        self.state.script.lock().extend(outcomes);
    }

    pub fn set_default_outcome(&self, outcome: SubscribeOutcome) {
        *self.state.default_outcome.lock() = outcome;
    }

    /// Make every later `send` fail, which breaks heartbeats
    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Push a change event into the open channel.
    /// Returns false if no channel is open.
    pub fn emit(&self, event: ChangeEvent) -> bool {
        self.state
            .live
            .lock()
            .as_ref()
            .map_or(false, |live| live.events.send(event))
    }

    /// Push a row change for `public.<table>` into the open channel
    pub fn emit_change(&self, change: ChangeType, table: &str) -> bool {
        self.emit(ChangeEvent::new(change, "public", table))
    }

    /// Push a change event through the sinks of the most recently released
    /// channel. Returns false if no channel has been released yet.
    pub fn emit_retired(&self, event: ChangeEvent) -> bool {
        self.state
            .retired
            .lock()
            .as_ref()
            .map_or(false, |retired| retired.events.send(event))
    }

    /// Report a status through the most recently released channel.
    pub fn emit_retired_status(&self, status: ChannelStatus) -> bool {
        self.state
            .retired
            .lock()
            .as_ref()
            .and_then(|retired| retired.status.as_ref())
            .map_or(false, |sink| sink.send(status))
    }

    /// Report a channel status for the open channel.
    /// Returns false if no channel has issued a subscribe request.
    pub fn emit_status(&self, status: ChannelStatus) -> bool {
        self.state
            .live
            .lock()
            .as_ref()
            .and_then(|live| live.status.as_ref())
            .map_or(false, |sink| sink.send(status))
    }

    pub fn is_open(&self) -> bool {
        self.state.live.lock().is_some()
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<ChannelMessage> {
        self.state.sent.lock().clone()
    }

    pub fn heartbeat_count(&self) -> usize {
        self.state.sent.lock().iter().filter(|m| m.is_heartbeat()).count()
    }

    /// Filters requested by every `open` call so far
    pub fn opened_filters(&self) -> Vec<ChannelFilter> {
        self.state.filters.lock().clone()
    }

    fn next_outcome(&self) -> SubscribeOutcome {
        self.state
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.state.default_outcome.lock())
    }
}

impl MockState {
    fn release(&self, id: u64) {
        let mut live = self.live.lock();
        if live.as_ref().map_or(false, |channel| channel.id == id) {
            *self.retired.lock() = live.take();
        }
    }
}

#[async_trait]
impl ChannelProvider for MockProvider {
    async fn open(
        &self,
        name: &str,
        filter: &ChannelFilter,
        events: EventSink,
    ) -> Result<Box<dyn ChannelHandle>, ProviderError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.filters.lock().push(filter.clone());

        let outcome = self.next_outcome();
        match outcome {
            SubscribeOutcome::FailOpen => {
                return Err(ProviderError::Open {
                    channel: name.to_string(),
                    reason: "scripted open failure".to_string(),
                });
            }
            SubscribeOutcome::StallOpen => std::future::pending::<()>().await,
            _ => {}
        }

        let id = self.state.next_channel.fetch_add(1, Ordering::SeqCst);
        let mut live = self.state.live.lock();
        if let Some(previous) = live.take() {
            *self.state.retired.lock() = Some(previous);
        }
        *live = Some(LiveChannel {
            id,
            events,
            status: None,
        });
        drop(live);

        Ok(Box::new(MockHandle {
            id,
            name: name.to_string(),
            outcome,
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self, handle: Box<dyn ChannelHandle>) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        drop(handle);
    }
}

struct MockHandle {
    id: u64,
    name: String,
    outcome: SubscribeOutcome,
    state: Arc<MockState>,
}

#[async_trait]
impl ChannelHandle for MockHandle {
    async fn subscribe(&mut self, status: StatusSink) -> Result<(), ProviderError> {
        if self.outcome == SubscribeOutcome::FailSubscribe {
            return Err(ProviderError::Subscribe("scripted subscribe failure".to_string()));
        }

        if let Some(live) = self.state.live.lock().as_mut() {
            if live.id == self.id {
                live.status = Some(status.clone());
            }
        }

        match self.outcome {
            SubscribeOutcome::Acknowledge => {
                status.send(ChannelStatus::Subscribed);
            }
            SubscribeOutcome::Reply(reply) => {
                status.send(reply);
            }
            SubscribeOutcome::StallSubscribe => std::future::pending::<()>().await,
            _ => {}
        }
        Ok(())
    }

    async fn send(&self, message: ChannelMessage) -> Result<(), ProviderError> {
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(ProviderError::Send("scripted send failure".to_string()));
        }
        self.state.sent.lock().push(message);
        Ok(())
    }

    fn channel_name(&self) -> &str {
        &self.name
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.state.release(self.id);
    }
}

/// Collects delivered events for later assertions
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subscription callback that records into this recorder
    pub fn callback(&self) -> impl Fn(&ChangeEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |event| events.lock().push(event.clone())
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn count(&self, change: ChangeType) -> usize {
        self.events.lock().iter().filter(|e| e.event_type == change).count()
    }
}

/// Wait until the manager reports `status`, giving up after `timeout`.
pub async fn wait_for_status(
    manager: &RealtimeManager,
    status: ConnectionStatus,
    timeout: Duration,
) -> bool {
    let mut rx = manager.watch_state();
    let outcome = tokio::time::timeout(timeout, rx.wait_for(|state| state.status == status)).await;
    matches!(outcome, Ok(Ok(_)))
}
