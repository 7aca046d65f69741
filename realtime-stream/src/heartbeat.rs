//! Liveness probing while connected.
//!
//! The monitor only tracks when the next beat is due; the connection worker
//! sleeps until [`HeartbeatMonitor::deadline`] and then calls
//! [`HeartbeatMonitor::beat`]. A send that fails or hangs past the send
//! timeout is reported as a lost connection.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::ConnectionError;
use crate::provider::ChannelHandle;
use crate::types::ChannelMessage;

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    send_timeout: Duration,
    next_beat: Option<Instant>,
    beats_sent: u64,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, send_timeout: Duration) -> Self {
        Self {
            interval,
            send_timeout,
            next_beat: None,
            beats_sent: 0,
        }
    }

    /// Schedule the first beat one interval from now. Restarting replaces
    /// any pending beat, so at most one is ever scheduled.
    pub fn start(&mut self) {
        self.next_beat = Some(Instant::now() + self.interval);
        debug!(interval_ms = self.interval.as_millis() as u64, "Heartbeat started");
    }

    pub fn stop(&mut self) {
        if self.next_beat.take().is_some() {
            debug!("Heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.next_beat.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.next_beat
    }

    pub fn beats_sent(&self) -> u64 {
        self.beats_sent
    }

    /// Send one probe and schedule the next.
    pub async fn beat(&mut self, channel: &dyn ChannelHandle) -> Result<(), ConnectionError> {
        self.next_beat = Some(Instant::now() + self.interval);

        match time::timeout(self.send_timeout, channel.send(ChannelMessage::heartbeat())).await {
            Ok(Ok(())) => {
                self.beats_sent += 1;
                trace!(channel = channel.channel_name(), "Heartbeat sent");
                Ok(())
            }
            Ok(Err(e)) => {
                self.next_beat = None;
                Err(ConnectionError::HeartbeatFailed(e.to_string()))
            }
            Err(_) => {
                self.next_beat = None;
                Err(ConnectionError::HeartbeatFailed(format!(
                    "send did not complete within {:?}",
                    self.send_timeout
                )))
            }
        }
    }
}
