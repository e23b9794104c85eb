use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::frame::Frame;
use crate::{BoundingBox, RawDetection};

/// Stub backend for testing. Reports one fixed-confidence detection per
/// frame, cycling through its labels.
pub struct StubBackend {
    labels: Vec<String>,
    confidence: f32,
    next: usize,
}

impl StubBackend {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            confidence: 0.9,
            next: 0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(["apple"])
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        if self.labels.is_empty() {
            return Ok(Vec::new());
        }
        let label = self.labels[self.next % self.labels.len()].clone();
        self.next = self.next.wrapping_add(1);
        Ok(vec![RawDetection::new(
            label,
            self.confidence,
            BoundingBox::new(25.0, 25.0, 50.0, 50.0),
            frame.captured_at,
        )])
    }
}
