//! Cross-stage metrics.
//!
//! `MetricsAggregator` is shared by every stage behind an `Arc`. Each rolling
//! window sits behind its own `Mutex`, held only for the few instructions it
//! takes to update or read it and never across a blocking call.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::channel::QueueGauge;

/// Samples kept for the inference latency average.
pub const LATENCY_WINDOW: usize = 30;

/// Length of the frames-per-second window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Rolling average over the most recent `capacity` samples.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, sample: Duration) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: Duration = self.samples.iter().sum();
        total.as_secs_f64() * 1000.0 / self.samples.len() as f64
    }
}

/// Event counter that publishes a rate each time its window elapses, then
/// resets.
#[derive(Debug, Clone)]
pub struct RateWindow {
    window: Duration,
    started: Instant,
    count: u64,
    rate: f64,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    fn starting_at(window: Duration, started: Instant) -> Self {
        Self {
            window,
            started,
            count: 0,
            rate: 0.0,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, now: Instant) {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.window {
            self.rate = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.started = now;
        }
    }

    /// Rate published by the last completed window.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub name: String,
    pub depth: usize,
    pub capacity: usize,
    pub dropped: u64,
}

/// Point-in-time status, forwarded as `Event::SystemStats`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Inference throughput.
    pub frames_per_second: f64,
    pub capture_fps: f64,
    /// Average over the last `LATENCY_WINDOW` detector calls.
    pub inference_latency_ms: f64,
    pub queue_depths: Vec<QueueDepth>,
    pub item_count: u64,
    pub model_info: String,
}

#[derive(Debug)]
pub struct MetricsAggregator {
    latency: Mutex<LatencyWindow>,
    inference_rate: Mutex<RateWindow>,
    capture_rate: Mutex<RateWindow>,
    item_count: AtomicU64,
    queues: Mutex<Vec<QueueGauge>>,
    model_info: Mutex<String>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            latency: Mutex::new(LatencyWindow::new(LATENCY_WINDOW)),
            inference_rate: Mutex::new(RateWindow::new(RATE_WINDOW)),
            capture_rate: Mutex::new(RateWindow::new(RATE_WINDOW)),
            item_count: AtomicU64::new(0),
            queues: Mutex::new(Vec::new()),
            model_info: Mutex::new(String::new()),
        }
    }

    pub fn watch_queue(&self, gauge: QueueGauge) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.push(gauge);
        }
    }

    pub fn set_model_info(&self, info: impl Into<String>) {
        if let Ok(mut guard) = self.model_info.lock() {
            *guard = info.into();
        }
    }

    pub fn record_capture(&self) {
        if let Ok(mut rate) = self.capture_rate.lock() {
            rate.tick();
        }
    }

    /// Record one completed detector call.
    pub fn record_inference(&self, elapsed: Duration) {
        if let Ok(mut latency) = self.latency.lock() {
            latency.record(elapsed);
        }
        if let Ok(mut rate) = self.inference_rate.lock() {
            rate.tick();
        }
    }

    pub fn set_item_count(&self, count: u64) {
        self.item_count.store(count, Ordering::SeqCst);
    }

    pub fn increment_item_count(&self) -> u64 {
        self.item_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn item_count(&self) -> u64 {
        self.item_count.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inference_latency_ms = self
            .latency
            .lock()
            .map(|latency| latency.average_ms())
            .unwrap_or_default();
        let frames_per_second = self
            .inference_rate
            .lock()
            .map(|rate| rate.rate())
            .unwrap_or_default();
        let capture_fps = self
            .capture_rate
            .lock()
            .map(|rate| rate.rate())
            .unwrap_or_default();
        let queue_depths = self
            .queues
            .lock()
            .map(|queues| {
                queues
                    .iter()
                    .map(|gauge| QueueDepth {
                        name: gauge.name().to_string(),
                        depth: gauge.depth(),
                        capacity: gauge.capacity(),
                        dropped: gauge.dropped(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let model_info = self
            .model_info
            .lock()
            .map(|info| info.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            frames_per_second,
            capture_fps,
            inference_latency_ms,
            queue_depths,
            item_count: self.item_count(),
            model_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::stage_channel;

    #[test]
    fn latency_window_keeps_last_thirty_samples() {
        let mut window = LatencyWindow::new(LATENCY_WINDOW);
        for _ in 0..10 {
            window.record(Duration::from_millis(500));
        }
        for _ in 0..LATENCY_WINDOW {
            window.record(Duration::from_millis(20));
        }
        assert_eq!(window.len(), LATENCY_WINDOW);
        assert!((window.average_ms() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn empty_latency_window_averages_zero() {
        assert_eq!(LatencyWindow::new(4).average_ms(), 0.0);
    }

    #[test]
    fn rate_window_publishes_after_one_second() {
        let start = Instant::now();
        let mut rate = RateWindow::starting_at(RATE_WINDOW, start);
        for i in 1..10 {
            rate.tick_at(start + Duration::from_millis(i * 100));
        }
        assert_eq!(rate.rate(), 0.0);

        rate.tick_at(start + Duration::from_millis(1000));
        assert!((rate.rate() - 10.0).abs() < 1e-6);

        // Window reset: next value comes from fresh counts only.
        for i in 1..=5 {
            rate.tick_at(start + Duration::from_millis(1000 + i * 400));
        }
        assert!((rate.rate() - 3.0 / 1.2).abs() < 1e-6);
    }

    #[test]
    fn snapshot_collects_queues_and_counters() {
        let metrics = MetricsAggregator::new();
        let (tx, rx) = stage_channel::<u8>("frames", 2);
        metrics.watch_queue(rx.gauge());
        metrics.set_model_info("demo (cpu)");
        metrics.set_item_count(4);
        assert_eq!(metrics.increment_item_count(), 5);
        metrics.record_inference(Duration::from_millis(12));

        tx.send(1).expect("send");
        tx.send(2).expect("send");
        let _ = tx.send(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.item_count, 5);
        assert_eq!(snapshot.model_info, "demo (cpu)");
        assert!((snapshot.inference_latency_ms - 12.0).abs() < 1e-6);
        assert_eq!(
            snapshot.queue_depths,
            vec![QueueDepth {
                name: "frames".to_string(),
                depth: 2,
                capacity: 2,
                dropped: 1,
            }]
        );
    }
}
