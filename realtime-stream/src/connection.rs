//! Connection state machine
//!
//! A single worker task owns the channel handle, every timer and the
//! connection state. The facade and the channel provider only send it
//! messages; nothing else mutates connection state, so two connection
//! attempts can never overlap.
//!
//! ```text
//! idle -> connecting -> connected -> reconnecting -> connecting ...
//!                    \-> reconnecting (attempt failed)
//! reconnecting -> polling | failed   (attempts exhausted)
//! polling | failed -> connecting     (force_reconnect only)
//! any -> idle                        (teardown)
//! ```
//!
//! Every published snapshot is written to a watch channel and queued for the
//! connection listeners on the dispatch thread.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::backoff::BackoffScheduler;
use crate::config::{ExhaustionPolicy, ManagerConfig};
use crate::dispatcher::Delivery;
use crate::error::ConnectionError;
use crate::health::HealthTracker;
use crate::heartbeat::HeartbeatMonitor;
use crate::polling::PollingDriver;
use crate::provider::{ChannelHandle, ChannelProvider, EventSink, StatusSink};
use crate::registry::SubscriptionRegistry;
use crate::types::{ChangeEvent, ChannelFilter, ChannelStatus, ConnectionState, ConnectionStatus};

/// Requests from the facade
#[derive(Debug)]
pub(crate) enum Command {
    /// Start connecting if idle
    EnsureConnected,
    /// Tear the channel down if no subscriptions remain
    ReleaseIfUnused,
    ForceReconnect,
    Teardown {
        /// Signalled once the teardown has reached the dispatch thread
        ack: Option<oneshot::Sender<()>>,
    },
    /// Signalled once everything queued before it has been dispatched
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

/// Notifications from an open channel
#[derive(Debug)]
pub(crate) enum ChannelSignal {
    Event(ChangeEvent),
    Status {
        status: ChannelStatus,
        reason: Option<String>,
    },
}

/// Result of a connection attempt, reported by the task that ran it
pub(crate) enum AttemptOutcome {
    /// The subscribe request went out; the acknowledgement follows as a status
    Requested(Box<dyn ChannelHandle>),
    /// The channel opened but the subscribe request failed or timed out
    Rejected {
        handle: Box<dyn ChannelHandle>,
        error: ConnectionError,
    },
    /// No channel was opened
    Failed(ConnectionError),
}

impl AttemptOutcome {
    fn into_handle(self) -> Option<Box<dyn ChannelHandle>> {
        match self {
            AttemptOutcome::Requested(handle) | AttemptOutcome::Rejected { handle, .. } => Some(handle),
            AttemptOutcome::Failed(_) => None,
        }
    }
}

impl fmt::Debug for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Requested(handle) => f
                .debug_tuple("Requested")
                .field(&handle.channel_name())
                .finish(),
            AttemptOutcome::Rejected { handle, error } => f
                .debug_struct("Rejected")
                .field("channel", &handle.channel_name())
                .field("error", error)
                .finish(),
            AttemptOutcome::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Command(Command),
    Channel {
        /// Channel generation the signal was produced for
        generation: u64,
        signal: ChannelSignal,
    },
    Attempt {
        /// Channel generation the attempt was started for
        generation: u64,
        outcome: AttemptOutcome,
    },
}

/// State shared between the worker and the facade
pub(crate) struct SharedState {
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) health: Arc<Mutex<HealthTracker>>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) deliveries: Sender<Delivery>,
}

pub(crate) struct ConnectionActor {
    config: ManagerConfig,
    provider: Arc<dyn ChannelProvider>,
    shared: SharedState,
    backoff: BackoffScheduler,
    heartbeat: HeartbeatMonitor,
    polling: PollingDriver,
    state: ConnectionState,
    /// Handed to providers through the event and status sinks
    mailbox: mpsc::UnboundedSender<ActorMessage>,
    channel: Option<Box<dyn ChannelHandle>>,
    /// Bumped whenever a channel is opened or closed
    generation: u64,
    /// Deadline of the attempt in flight, covering open, subscribe and the
    /// acknowledgement
    pending_ack: Option<Instant>,
    /// `SUBSCRIBED` arrived before the attempt handed over its channel
    ack_received: bool,
    retry_at: Option<Instant>,
}

impl ConnectionActor {
    pub(crate) fn new(
        config: ManagerConfig,
        provider: Arc<dyn ChannelProvider>,
        shared: SharedState,
        mailbox: mpsc::UnboundedSender<ActorMessage>,
    ) -> Self {
        Self {
            backoff: BackoffScheduler::new(config.backoff.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval, config.subscribe_timeout),
            polling: PollingDriver::new(config.poll_interval),
            state: ConnectionState::new(config.max_reconnect_attempts),
            config,
            provider,
            shared,
            mailbox,
            channel: None,
            generation: 0,
            pending_ack: None,
            ack_received: false,
            retry_at: None,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActorMessage>) {
        debug!(channel = %self.config.channel_name, "Connection worker started");

        loop {
            let ack_deadline = self.pending_ack;
            let retry_at = self.retry_at;
            let heartbeat_at = self.heartbeat.deadline();
            let poll_at = self.polling.deadline();

            tokio::select! {
                biased;

                message = rx.recv() => match message {
                    Some(ActorMessage::Command(Command::Shutdown)) | None => break,
                    Some(ActorMessage::Command(command)) => self.handle_command(command).await,
                    Some(ActorMessage::Channel { generation, signal }) => {
                        self.handle_signal(generation, signal).await
                    }
                    Some(ActorMessage::Attempt { generation, outcome }) => {
                        self.handle_attempt(generation, outcome).await
                    }
                },
                _ = sleep_until(ack_deadline) => {
                    self.pending_ack = None;
                    self.on_attempt_failed(ConnectionError::SubscribeTimeout(
                        self.config.subscribe_timeout,
                    ))
                    .await;
                }
                _ = sleep_until(retry_at) => {
                    self.retry_at = None;
                    self.connect().await;
                }
                _ = sleep_until(heartbeat_at) => self.on_heartbeat().await,
                _ = sleep_until(poll_at) => self.polling.tick(&self.shared.deliveries),
            }
        }

        rx.close();
        self.teardown().await;

        // Attempts that finish from now on close their own channel.
        while let Ok(message) = rx.try_recv() {
            if let ActorMessage::Attempt { outcome, .. } = message {
                if let Some(handle) = outcome.into_handle() {
                    close_within(self.provider.as_ref(), handle, self.config.subscribe_timeout).await;
                }
            }
        }
        debug!(channel = %self.config.channel_name, "Connection worker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::EnsureConnected => {
                if self.state.status == ConnectionStatus::Idle {
                    self.connect().await;
                }
            }
            Command::ReleaseIfUnused => {
                if self.shared.registry.is_empty() {
                    info!("No active subscriptions, releasing channel");
                    self.teardown().await;
                }
            }
            Command::ForceReconnect => self.force_reconnect().await,
            Command::Teardown { ack } => {
                self.teardown().await;
                if let Some(ack) = ack {
                    self.forward_barrier(ack);
                }
            }
            Command::Barrier(done) => self.forward_barrier(done),
            Command::Shutdown => {}
        }
    }

    async fn handle_signal(&mut self, generation: u64, signal: ChannelSignal) {
        if generation != self.generation {
            trace!(
                generation,
                current = self.generation,
                "Ignoring signal from stale channel"
            );
            return;
        }

        match signal {
            ChannelSignal::Event(mut event) => {
                event.received_at = Utc::now();
                if self.shared.deliveries.send(Delivery::Change(event)).is_err() {
                    warn!("Dispatch thread is gone, dropping change event");
                }
            }
            ChannelSignal::Status { status, reason } => self.handle_status(status, reason).await,
        }
    }

    async fn handle_status(&mut self, status: ChannelStatus, reason: Option<String>) {
        let awaiting_ack = self.pending_ack.is_some();

        match status {
            ChannelStatus::Subscribed if awaiting_ack => {
                if self.channel.is_some() {
                    self.on_connected();
                } else {
                    self.ack_received = true;
                }
            }
            ChannelStatus::Subscribed => trace!("Duplicate subscription acknowledgement"),
            failure if awaiting_ack => {
                self.pending_ack = None;
                self.on_attempt_failed(ConnectionError::from_status(failure, reason))
                    .await;
            }
            failure if self.state.status == ConnectionStatus::Connected => {
                self.handle_disconnect(ConnectionError::from_status(failure, reason))
                    .await;
            }
            failure => debug!(status = %failure, "Ignoring channel status outside a live connection"),
        }
    }

    /// Start a connection attempt.
    ///
    /// Opening the channel and issuing the subscribe request run on their own
    /// task, which reports back with [`ActorMessage::Attempt`]. Until the
    /// acknowledgement arrives `pending_ack` holds the deadline and further
    /// attempts are refused. Commands keep being served in the meantime.
    async fn connect(&mut self) {
        if self.pending_ack.is_some() {
            debug!("Connection attempt already in flight");
            return;
        }

        if self.shared.registry.is_empty() {
            debug!("No active subscriptions, not connecting");
            self.teardown().await;
            return;
        }

        self.retry_at = None;
        self.heartbeat.stop();
        self.close_channel().await;

        self.shared.health.lock().record_attempt();
        self.state.status = ConnectionStatus::Connecting;
        self.publish();

        let deadline = Instant::now() + self.config.subscribe_timeout;
        let generation = self.generation;
        self.pending_ack = Some(deadline);
        self.ack_received = false;
        info!(
            channel = %self.config.channel_name,
            generation,
            attempt = self.state.reconnect_attempts + 1,
            "Connecting to realtime channel"
        );

        let attempt = ChannelAttempt {
            provider: Arc::clone(&self.provider),
            name: self.config.channel_name.clone(),
            filter: self.config.channel_filter.clone(),
            events: EventSink::new(self.mailbox.clone(), generation),
            status: StatusSink::new(self.mailbox.clone(), generation),
            deadline,
            timeout: self.config.subscribe_timeout,
        };
        tokio::spawn(attempt.run(self.mailbox.clone(), generation));
    }

    /// The attempt task finished. A channel from an abandoned attempt is
    /// closed without touching the current state.
    async fn handle_attempt(&mut self, generation: u64, outcome: AttemptOutcome) {
        if generation != self.generation || self.pending_ack.is_none() {
            if let Some(handle) = outcome.into_handle() {
                debug!(generation, current = self.generation, "Closing channel from abandoned attempt");
                let provider = Arc::clone(&self.provider);
                let timeout = self.config.subscribe_timeout;
                tokio::spawn(async move { close_within(provider.as_ref(), handle, timeout).await });
            }
            return;
        }

        match outcome {
            AttemptOutcome::Requested(handle) => {
                self.channel = Some(handle);
                if self.ack_received {
                    self.on_connected();
                }
            }
            AttemptOutcome::Rejected { handle, error } => {
                self.channel = Some(handle);
                self.pending_ack = None;
                self.on_attempt_failed(error).await;
            }
            AttemptOutcome::Failed(error) => {
                self.pending_ack = None;
                self.on_attempt_failed(error).await;
            }
        }
    }

    fn on_connected(&mut self) {
        self.pending_ack = None;
        self.ack_received = false;
        self.shared.health.lock().record_success();

        self.state.status = ConnectionStatus::Connected;
        self.state.reconnect_attempts = 0;
        self.state.last_connected_at = Some(Utc::now());
        self.state.last_error = None;

        self.heartbeat.start();
        self.polling.stop();

        info!(
            channel = %self.config.channel_name,
            generation = self.generation,
            "Realtime channel connected"
        );
        self.publish();
    }

    async fn on_attempt_failed(&mut self, error: ConnectionError) {
        self.close_channel().await;
        self.shared.health.lock().record_failure();

        self.state.reconnect_attempts = self.state.reconnect_attempts.saturating_add(1);
        self.state.last_error = Some(error.to_string());

        warn!(
            error = %error,
            attempt = self.state.reconnect_attempts,
            max_attempts = self.state.max_reconnect_attempts,
            "Connection attempt failed"
        );

        if self.state.reconnect_attempts >= self.state.max_reconnect_attempts {
            self.exhaust();
        } else {
            self.schedule_retry(self.state.reconnect_attempts - 1);
        }
    }

    /// A live channel was lost. Retries immediately follow the backoff
    /// schedule without counting the loss as a failed attempt.
    async fn handle_disconnect(&mut self, error: ConnectionError) {
        if self.state.status != ConnectionStatus::Connected {
            return;
        }

        self.heartbeat.stop();
        self.close_channel().await;
        self.shared.health.lock().record_failure();
        self.state.last_error = Some(error.to_string());

        warn!(error = %error, "Realtime channel lost");
        self.schedule_retry(self.state.reconnect_attempts);
    }

    fn schedule_retry(&mut self, attempt: u32) {
        let delay = self.backoff.delay(attempt);
        self.retry_at = Some(Instant::now() + delay);
        self.state.status = ConnectionStatus::Reconnecting;

        debug!(delay_ms = delay.as_millis() as u64, attempt, "Reconnect scheduled");
        self.publish();
    }

    fn exhaust(&mut self) {
        self.retry_at = None;

        match self.config.exhaustion_policy {
            ExhaustionPolicy::Poll => {
                warn!(
                    poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                    "Reconnect attempts exhausted, falling back to polling"
                );
                self.state.status = ConnectionStatus::Polling;
                self.polling.start();
            }
            ExhaustionPolicy::Fail => {
                warn!("Reconnect attempts exhausted, connection failed");
                self.state.status = ConnectionStatus::Failed;
            }
        }
        self.publish();
    }

    async fn force_reconnect(&mut self) {
        info!(status = %self.state.status, "Forcing reconnect");

        self.state.reconnect_attempts = 0;
        self.retry_at = None;
        self.pending_ack = None;
        self.polling.stop();

        self.connect().await;
    }

    async fn on_heartbeat(&mut self) {
        let Some(channel) = self.channel.as_deref() else {
            self.heartbeat.stop();
            return;
        };

        let outcome = self.heartbeat.beat(channel).await;
        if let Err(e) = outcome {
            self.handle_disconnect(e).await;
        }
    }

    /// Cancel every timer, release the channel and return to idle.
    async fn teardown(&mut self) {
        self.retry_at = None;
        self.pending_ack = None;
        self.ack_received = false;
        self.heartbeat.stop();
        self.polling.stop();
        self.close_channel().await;
        self.state.reconnect_attempts = 0;

        if self.state.status != ConnectionStatus::Idle {
            info!(channel = %self.config.channel_name, "Realtime channel torn down");
            self.state.status = ConnectionStatus::Idle;
            self.publish();
        }
    }

    /// Release the current channel. Signals it produced afterwards are
    /// ignored because the generation moves on.
    async fn close_channel(&mut self) {
        self.generation += 1;

        if let Some(handle) = self.channel.take() {
            debug!(channel = handle.channel_name(), "Closing channel");
            close_within(self.provider.as_ref(), handle, self.config.subscribe_timeout).await;
        }
    }

    fn publish(&mut self) {
        self.state.is_connected = self.state.status == ConnectionStatus::Connected;
        self.state.revision += 1;

        let snapshot = self.state.clone();
        self.shared.state_tx.send_replace(snapshot.clone());
        if self.shared.deliveries.send(Delivery::State(snapshot)).is_err() {
            warn!("Dispatch thread is gone, dropping state notification");
        }
    }

    fn forward_barrier(&self, done: oneshot::Sender<()>) {
        if let Err(e) = self.shared.deliveries.send(Delivery::Barrier(done)) {
            if let Delivery::Barrier(done) = e.into_inner() {
                let _ = done.send(());
            }
        }
    }
}

/// Opens a channel and issues the subscribe request off the worker task.
///
/// Both steps are bounded by `deadline`, so the task always finishes and
/// hands any opened channel back for closing.
struct ChannelAttempt {
    provider: Arc<dyn ChannelProvider>,
    name: String,
    filter: ChannelFilter,
    events: EventSink,
    status: StatusSink,
    deadline: Instant,
    timeout: Duration,
}

impl ChannelAttempt {
    async fn run(self, mailbox: mpsc::UnboundedSender<ActorMessage>, generation: u64) {
        let provider = Arc::clone(&self.provider);
        let timeout = self.timeout;
        let outcome = self.establish().await;

        if let Err(mpsc::error::SendError(message)) = mailbox.send(ActorMessage::Attempt { generation, outcome }) {
            if let ActorMessage::Attempt { outcome, .. } = message {
                if let Some(handle) = outcome.into_handle() {
                    close_within(provider.as_ref(), handle, timeout).await;
                }
            }
        }
    }

    async fn establish(self) -> AttemptOutcome {
        let opened = time::timeout_at(
            self.deadline,
            self.provider.open(&self.name, &self.filter, self.events),
        )
        .await;

        let mut handle = match opened {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return AttemptOutcome::Failed(e.into()),
            Err(_) => return AttemptOutcome::Failed(ConnectionError::SubscribeTimeout(self.timeout)),
        };

        match time::timeout_at(self.deadline, handle.subscribe(self.status)).await {
            Ok(Ok(())) => AttemptOutcome::Requested(handle),
            Ok(Err(e)) => AttemptOutcome::Rejected {
                handle,
                error: e.into(),
            },
            Err(_) => AttemptOutcome::Rejected {
                handle,
                error: ConnectionError::SubscribeTimeout(self.timeout),
            },
        }
    }
}

async fn close_within(provider: &dyn ChannelProvider, handle: Box<dyn ChannelHandle>, timeout: Duration) {
    if time::timeout(timeout, provider.close(handle)).await.is_err() {
        warn!("Provider did not close the channel in time");
    }
}

fn sleep_until(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
