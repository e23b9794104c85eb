use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ShutdownSignal;
use crate::channel::{RecvError, StageReceiver};
use crate::metrics::MetricsAggregator;
use crate::transport::EventTransport;
use crate::Event;

/// Forwards queued events and periodic `SystemStats` to the transport as a
/// single ordered stream.
pub(super) struct FanoutStage {
    pub transport: Box<dyn EventTransport>,
    pub events: StageReceiver<Event>,
    pub metrics: Arc<MetricsAggregator>,
    pub shutdown: ShutdownSignal,
    pub recv_timeout: Duration,
    pub stats_interval: Duration,
    /// How long to keep flushing queued events once shutdown is observed.
    pub flush_grace: Duration,
}

impl FanoutStage {
    pub fn run(mut self) -> Result<()> {
        let mut next_stats = Instant::now() + self.stats_interval;

        while !self.shutdown.is_triggered() {
            let now = Instant::now();
            if now >= next_stats {
                self.forward(&Event::SystemStats {
                    stats: self.metrics.snapshot(),
                });
                next_stats += self.stats_interval;
                if next_stats <= now {
                    next_stats = now + self.stats_interval;
                }
            }

            let wait = next_stats
                .saturating_duration_since(Instant::now())
                .min(self.recv_timeout);
            match self.events.recv_timeout(wait) {
                Ok(event) => self.forward(&event),
                Err(RecvError::Empty) => {}
                Err(RecvError::Disconnected) => {
                    log::debug!("fanout: event channel closed");
                    break;
                }
            }
        }

        self.forward(&Event::log("Pipeline stopping"));
        self.flush();
        log::info!("Pipeline stopped");
        self.forward(&Event::log("Pipeline stopped"));

        if let Err(err) = self.transport.close() {
            log::warn!("transport close failed: {:#}", err);
        }
        Ok(())
    }

    /// Deliver what the producers queue while they wind down.
    fn flush(&mut self) {
        let deadline = Instant::now() + self.flush_grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.events.recv_timeout(remaining.min(self.recv_timeout)) {
                Ok(event) => self.forward(&event),
                Err(RecvError::Empty) => {}
                Err(RecvError::Disconnected) => break,
            }
        }
    }

    fn forward(&mut self, event: &Event) {
        if let Err(err) = self.transport.publish(event) {
            log::warn!("transport publish failed ({}): {:#}", event.kind(), err);
        }
    }
}
