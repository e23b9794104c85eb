//! Camera sources.
//!
//! This module provides the capture side of the pipeline:
//! - Synthetic cameras (`stub://` URLs) for demos and tests
//! - USB/V4L2 devices (feature: camera-v4l2)
//!
//! Every source follows the same lifecycle: `open` once, `read` repeatedly,
//! `close` on the way out. A failed `read` is treated by the capture stage as
//! transient; only a failed `open` stops the stage.

use anyhow::{bail, Result};

use crate::config::CameraSettings;
use crate::frame::Frame;

mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticCamera;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Outcome of a single camera read.
#[derive(Debug)]
pub enum Capture {
    Frame(Frame),
    /// No frame available right now; keep polling.
    EndOfStream,
}

pub trait CameraSource: Send {
    /// Source description for log messages.
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<()>;

    /// Capture the next frame. May block for up to one frame interval.
    fn read(&mut self) -> Result<Capture>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Build a camera source for the configured URL.
pub fn open_camera(settings: &CameraSettings) -> Result<Box<dyn CameraSource>> {
    if settings.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(settings.clone())));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        if settings.url.starts_with("/dev/") || settings.url.starts_with("v4l2://") {
            return Ok(Box::new(V4l2Camera::new(settings.clone())));
        }
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        if settings.url.starts_with("/dev/") || settings.url.starts_with("v4l2://") {
            bail!("camera {} requires the camera-v4l2 feature", settings.url);
        }
    }
    bail!("unsupported camera url: {}", settings.url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_urls_build_synthetic_cameras() -> Result<()> {
        let settings = CameraSettings {
            url: "stub://fridge".to_string(),
            ..CameraSettings::default()
        };
        let camera = open_camera(&settings)?;
        assert!(camera.describe().contains("stub://fridge"));
        Ok(())
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        let settings = CameraSettings {
            url: "rtsp://10.0.0.2/stream".to_string(),
            ..CameraSettings::default()
        };
        assert!(open_camera(&settings).is_err());
    }
}
