use anyhow::Result;

use crate::frame::Frame;
use crate::RawDetection;

/// Detector backend trait.
///
/// The pipeline treats a backend as an opaque, possibly slow function from a
/// frame to detections. It runs on the inference worker only, so `detect`
/// takes `&mut self` and needs no internal locking.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Human-readable model description, reported in status snapshots.
    fn describe(&self) -> String {
        self.name().to_string()
    }

    /// Run detection on a frame.
    ///
    /// Every returned detection carries `frame.captured_at` as its timestamp.
    /// Implementations must not keep the pixel slice beyond the call.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
