use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use crate::detect::backend::DetectorBackend;
use crate::frame::Frame;
use crate::{BoundingBox, RawDetection};

/// Labels the demo backend picks from, with their Japanese display names.
pub const FOOD_LABELS: [(&str, &str); 15] = [
    ("apple", "りんご"),
    ("banana", "バナナ"),
    ("orange", "オレンジ"),
    ("carrot", "にんじん"),
    ("broccoli", "ブロッコリー"),
    ("tomato", "トマト"),
    ("egg", "卵"),
    ("cabbage", "キャベツ"),
    ("milk", "牛乳"),
    ("bread", "パン"),
    ("cheese", "チーズ"),
    ("beef", "牛肉"),
    ("chicken", "鶏肉"),
    ("fish", "魚"),
    ("rice", "米"),
];

/// Simulated food detector.
///
/// Emits one detection per `interval` with a random label, a confidence in
/// `[0.70, 0.95]` and a box covering 25-40% of each frame axis.
pub struct DemoBackend {
    interval: Duration,
    last_detection: Instant,
    japanese: bool,
    rng: StdRng,
}

impl DemoBackend {
    pub fn new(interval: Duration, japanese: bool) -> Self {
        Self {
            interval,
            last_detection: Instant::now(),
            japanese,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests.
    pub fn seeded(interval: Duration, japanese: bool, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(interval, japanese)
        }
    }

    fn random_detection(&mut self, timestamp: u64) -> RawDetection {
        let (english, japanese) = FOOD_LABELS[self.rng.gen_range(0..FOOD_LABELS.len())];
        let label = if self.japanese { japanese } else { english };

        let width = self.rng.gen_range(25.0..40.0);
        let height = self.rng.gen_range(25.0..40.0);
        let left = self.rng.gen_range(10.0..60.0);
        let top = self.rng.gen_range(10.0..60.0);
        let confidence = self.rng.gen_range(0.70..0.95);

        RawDetection::new(
            label,
            confidence,
            BoundingBox::new(left, top, width, height),
            timestamp,
        )
    }
}

impl DetectorBackend for DemoBackend {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn describe(&self) -> String {
        "demo (cpu, simulated)".to_string()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        if self.last_detection.elapsed() < self.interval {
            return Ok(Vec::new());
        }
        self.last_detection = Instant::now();
        Ok(vec![self.random_detection(frame.captured_at)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: u64) -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, ts, 0)
    }

    #[test]
    fn demo_backend_waits_for_interval() -> Result<()> {
        let mut backend = DemoBackend::seeded(Duration::from_secs(3600), false, 7);
        assert!(backend.detect(&frame(1))?.is_empty());
        Ok(())
    }

    #[test]
    fn demo_backend_emits_food_detection() -> Result<()> {
        let mut backend = DemoBackend::seeded(Duration::ZERO, false, 7);
        let detections = backend.detect(&frame(42))?;
        assert_eq!(detections.len(), 1);

        let det = &detections[0];
        assert!(FOOD_LABELS.iter().any(|(en, _)| *en == det.label));
        assert!((0.70..=0.95).contains(&det.confidence));
        assert!((25.0..=40.0).contains(&det.bbox.width));
        assert!((10.0..=60.0).contains(&det.bbox.left));
        assert_eq!(det.timestamp, 42);
        Ok(())
    }

    #[test]
    fn demo_backend_reports_japanese_names() -> Result<()> {
        let mut backend = DemoBackend::seeded(Duration::ZERO, true, 11);
        let det = backend.detect(&frame(0))?.remove(0);
        assert!(FOOD_LABELS.iter().any(|(_, ja)| *ja == det.label));
        Ok(())
    }
}
