//! Polling fallback once live mode is given up.
//!
//! While active, every `interval` the driver queues one polling round on the
//! dispatch thread, which delivers a `POLL_UPDATE` cue for its own table to
//! each live subscription. Consumers re-fetch authoritative state on a cue.

use std::time::Duration;

use crossbeam::channel::Sender;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::dispatcher::Delivery;

#[derive(Debug)]
pub struct PollingDriver {
    interval: Duration,
    next_poll: Option<Instant>,
    cycles: u64,
}

impl PollingDriver {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_poll: None,
            cycles: 0,
        }
    }

    /// Begin polling. The first cue is due one interval from now.
    /// Starting an active driver is a no-op.
    pub fn start(&mut self) {
        if self.next_poll.is_none() {
            self.next_poll = Some(Instant::now() + self.interval);
            debug!(interval_ms = self.interval.as_millis() as u64, "Polling started");
        }
    }

    pub fn stop(&mut self) {
        if self.next_poll.take().is_some() {
            debug!(cycles = self.cycles, "Polling stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.next_poll.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.next_poll
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Queue one polling round and schedule the next.
    pub(crate) fn tick(&mut self, deliveries: &Sender<Delivery>) {
        if self.next_poll.is_none() {
            return;
        }
        self.next_poll = Some(Instant::now() + self.interval);
        self.cycles += 1;

        if deliveries.send(Delivery::Poll).is_err() {
            warn!("Dispatch thread is gone, dropping polling round");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_cue_is_one_interval_out() {
        let mut driver = PollingDriver::new(Duration::from_secs(30));
        let before = Instant::now();
        driver.start();

        let deadline = driver.deadline().unwrap();
        assert!(deadline >= before + Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut driver = PollingDriver::new(Duration::from_secs(30));
        driver.start();
        let first = driver.deadline();
        driver.start();
        assert_eq!(driver.deadline(), first);
    }

    #[tokio::test]
    async fn test_tick_queues_poll_round() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let mut driver = PollingDriver::new(Duration::from_secs(30));

        driver.tick(&tx);
        assert!(rx.try_recv().is_err());

        driver.start();
        driver.tick(&tx);
        driver.tick(&tx);

        assert_eq!(driver.cycles(), 2);
        assert!(matches!(rx.try_recv(), Ok(Delivery::Poll)));
        assert!(matches!(rx.try_recv(), Ok(Delivery::Poll)));

        driver.stop();
        assert!(!driver.is_active());
        driver.tick(&tx);
        assert!(rx.try_recv().is_err());
    }
}
