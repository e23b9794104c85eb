//! V4L2 camera source.
//!
//! Captures RGB frames from a local device node (e.g. `/dev/video0`, or
//! `v4l2:///dev/video0`) through libv4l memory-mapped streaming.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::{CameraSource, Capture};
use crate::config::CameraSettings;
use crate::frame::Frame;
use crate::now_ms;

pub struct V4l2Camera {
    settings: CameraSettings,
    state: Option<DeviceState>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            frame_count: 0,
        }
    }

    fn device_path(&self) -> &str {
        self.settings
            .url
            .strip_prefix("v4l2://")
            .unwrap_or(&self.settings.url)
    }
}

impl CameraSource for V4l2Camera {
    fn describe(&self) -> String {
        format!(
            "{} ({}x{} @ {} fps, v4l2)",
            self.device_path(),
            self.active_width,
            self.active_height,
            self.settings.target_fps
        )
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture as _;

        let path = self.device_path().to_string();
        let device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", path, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: connected to {} ({}x{})",
            path,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Capture> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let pixels = state
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;
        if pixels.is_empty() {
            return Ok(Capture::EndOfStream);
        }

        self.frame_count += 1;
        Ok(Capture::Frame(Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            now_ms()?,
            self.frame_count,
        )))
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Camera: released {} after {} frames",
                self.device_path(),
                self.frame_count
            );
        }
    }
}
