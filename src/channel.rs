//! Bounded stage channels with drop-newest backpressure.
//!
//! `send` never blocks: when the queue is at capacity the caller gets
//! `SendError::Full` back together with the rejected item and is expected to
//! drop it. `recv_timeout` blocks for at most the given duration, which is
//! what bounds every stage's shutdown latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError<T> {
    #[error("channel full")]
    Full(T),
    #[error("channel disconnected")]
    Disconnected(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Full(item) | SendError::Disconnected(item) => item,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    #[error("no item within timeout")]
    Empty,
    #[error("channel disconnected")]
    Disconnected,
}

#[derive(Debug)]
struct ChannelShared {
    name: &'static str,
    capacity: usize,
    dropped: AtomicU64,
}

/// Create a bounded channel of `capacity` items.
pub fn stage_channel<T>(name: &'static str, capacity: usize) -> (StageSender<T>, StageReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let shared = Arc::new(ChannelShared {
        name,
        capacity,
        dropped: AtomicU64::new(0),
    });
    (
        StageSender {
            inner: tx,
            shared: shared.clone(),
        },
        StageReceiver { inner: rx, shared },
    )
}

pub struct StageSender<T> {
    inner: Sender<T>,
    shared: Arc<ChannelShared>,
}

impl<T> Clone for StageSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> StageSender<T> {
    /// Non-blocking send. A full queue rejects the new item (drop-newest).
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        match self.inner.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full(item))
            }
            Err(TrySendError::Disconnected(item)) => Err(SendError::Disconnected(item)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }
}

pub struct StageReceiver<T> {
    inner: Receiver<T>,
    shared: Arc<ChannelShared>,
}

impl<T> StageReceiver<T> {
    /// Block for at most `timeout` waiting for the next item.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvError> {
        self.inner.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => RecvError::Empty,
            RecvTimeoutError::Disconnected => RecvError::Disconnected,
        })
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<T, RecvError> {
        self.inner.try_recv().map_err(|err| match err {
            TryRecvError::Empty => RecvError::Empty,
            TryRecvError::Disconnected => RecvError::Disconnected,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Read-only occupancy probe for the metrics aggregator.
    ///
    /// The gauge holds a receiver clone and no sender, so the consumer still
    /// sees `Disconnected` once every producer is gone.
    pub fn gauge(&self) -> QueueGauge
    where
        T: Send + 'static,
    {
        QueueGauge {
            probe: Arc::new(self.inner.clone()),
            shared: self.shared.clone(),
        }
    }
}

trait Occupancy: Send + Sync {
    fn occupancy(&self) -> usize;
}

impl<T: Send> Occupancy for Receiver<T> {
    fn occupancy(&self) -> usize {
        self.len()
    }
}

#[derive(Clone)]
pub struct QueueGauge {
    probe: Arc<dyn Occupancy>,
    shared: Arc<ChannelShared>,
}

impl QueueGauge {
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn depth(&self) -> usize {
        self.probe.occupancy()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Items rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for QueueGauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueGauge")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn overflow_drops_newest_without_blocking() {
        let (tx, rx) = stage_channel::<u32>("frames", 2);

        assert!(tx.send(1).is_ok());
        assert!(tx.send(2).is_ok());
        let started = Instant::now();
        assert_eq!(tx.send(3), Err(SendError::Full(3)));
        assert!(started.elapsed() < Duration::from_millis(50));

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
        assert_eq!(rx.try_recv(), Err(RecvError::Empty));
    }

    #[test]
    fn excess_sends_retain_exactly_capacity() {
        let (tx, rx) = stage_channel::<usize>("results", 5);
        let rejected = (0..12).filter(|i| tx.send(*i).is_err()).count();

        assert_eq!(rejected, 7);
        assert_eq!(rx.len(), 5);
        assert_eq!(rx.gauge().dropped(), 7);
    }

    #[test]
    fn recv_times_out_when_idle() {
        let (_tx, rx) = stage_channel::<u8>("events", 1);
        let started = Instant::now();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(30)),
            Err(RecvError::Empty)
        );
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn recv_reports_disconnect_after_senders_drop() {
        let (tx, rx) = stage_channel::<u8>("events", 4);
        tx.send(9).expect("send");
        drop(tx);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Ok(9));
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)),
            Err(RecvError::Disconnected)
        );
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (tx, rx) = stage_channel::<u32>("events", 16);
        for i in 0..10 {
            tx.send(i).expect("send");
        }
        let received: Vec<u32> = (0..10).filter_map(|_| rx.try_recv().ok()).collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn gauge_tracks_depth_without_holding_senders() {
        let (tx, rx) = stage_channel::<u8>("frames", 3);
        let gauge = rx.gauge();
        tx.send(1).expect("send");
        tx.send(2).expect("send");
        assert_eq!(gauge.depth(), 2);
        assert_eq!(gauge.capacity(), 3);
        assert_eq!(gauge.name(), "frames");

        drop(tx);
        rx.try_recv().expect("first");
        rx.try_recv().expect("second");
        assert_eq!(rx.try_recv(), Err(RecvError::Disconnected));
    }
}
