use anyhow::{bail, Result};
use std::time::{Duration, Instant};

use super::{CameraSource, Capture};
use crate::config::CameraSettings;
use crate::frame::Frame;
use crate::now_ms;

/// Synthetic camera for `stub://` URLs.
///
/// Produces RGB frames paced to `target_fps`. The scene pattern shifts every
/// 50 frames so that frame contents are not constant.
pub struct SyntheticCamera {
    settings: CameraSettings,
    opened: bool,
    frame_count: u64,
    scene_state: u8,
    next_frame_at: Option<Instant>,
    frame_limit: Option<u64>,
}

impl SyntheticCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            opened: false,
            frame_count: 0,
            scene_state: 0,
            next_frame_at: None,
            frame_limit: None,
        }
    }

    /// Stop producing frames after `limit`; later reads return
    /// `Capture::EndOfStream`.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn frame_interval(&self) -> Duration {
        if self.settings.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / self.settings.target_fps
        }
    }

    fn pace(&mut self) {
        let interval = self.frame_interval();
        let now = Instant::now();
        if let Some(deadline) = self.next_frame_at {
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        self.next_frame_at = Some(Instant::now() + interval);
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.settings.width as usize) * (self.settings.height as usize) * 3;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl CameraSource for SyntheticCamera {
    fn describe(&self) -> String {
        format!(
            "{} ({}x{} @ {} fps, synthetic)",
            self.settings.url, self.settings.width, self.settings.height, self.settings.target_fps
        )
    }

    fn open(&mut self) -> Result<()> {
        self.opened = true;
        log::info!("SyntheticCamera: connected to {}", self.settings.url);
        Ok(())
    }

    fn read(&mut self) -> Result<Capture> {
        if !self.opened {
            bail!("camera {} is not open", self.settings.url);
        }
        if self
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            self.pace();
            return Ok(Capture::EndOfStream);
        }

        self.pace();
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Ok(Capture::Frame(Frame::new(
            pixels,
            self.settings.width,
            self.settings.height,
            now_ms()?,
            self.frame_count,
        )))
    }

    fn close(&mut self) {
        if self.opened {
            log::info!(
                "SyntheticCamera: released {} after {} frames",
                self.settings.url,
                self.frame_count
            );
        }
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_settings() -> CameraSettings {
        CameraSettings {
            url: "stub://test".to_string(),
            target_fps: 0,
            width: 4,
            height: 2,
            ..CameraSettings::default()
        }
    }

    #[test]
    fn synthetic_camera_produces_sized_frames() -> Result<()> {
        let mut camera = SyntheticCamera::new(small_settings());
        camera.open()?;
        let Capture::Frame(frame) = camera.read()? else {
            panic!("expected a frame");
        };
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.byte_len(), 4 * 2 * 3);
        assert_eq!(frame.sequence, 1);
        Ok(())
    }

    #[test]
    fn read_before_open_fails() {
        let mut camera = SyntheticCamera::new(small_settings());
        assert!(camera.read().is_err());
    }

    #[test]
    fn frame_limit_yields_end_of_stream() -> Result<()> {
        let mut camera = SyntheticCamera::new(small_settings()).with_frame_limit(2);
        camera.open()?;
        assert!(matches!(camera.read()?, Capture::Frame(_)));
        assert!(matches!(camera.read()?, Capture::Frame(_)));
        assert!(matches!(camera.read()?, Capture::EndOfStream));
        assert!(matches!(camera.read()?, Capture::EndOfStream));
        assert_eq!(camera.frames_captured(), 2);
        Ok(())
    }

    #[test]
    fn reads_are_paced_to_target_fps() -> Result<()> {
        let mut camera = SyntheticCamera::new(CameraSettings {
            target_fps: 20,
            ..small_settings()
        });
        camera.open()?;
        let started = Instant::now();
        for _ in 0..3 {
            camera.read()?;
        }
        // First read is immediate, the next two wait ~50ms each.
        assert!(started.elapsed() >= Duration::from_millis(90));
        Ok(())
    }
}
