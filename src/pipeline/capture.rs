use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use super::{emit_info, emit_warn, ShutdownSignal};
use crate::channel::{SendError, StageSender};
use crate::frame::Frame;
use crate::ingest::{CameraSource, Capture};
use crate::metrics::MetricsAggregator;
use crate::Event;

pub(super) struct CaptureStage {
    pub camera: Box<dyn CameraSource>,
    pub frames: StageSender<Frame>,
    pub events: StageSender<Event>,
    pub metrics: Arc<MetricsAggregator>,
    pub shutdown: ShutdownSignal,
    pub retry_backoff: Duration,
}

impl CaptureStage {
    pub fn run(mut self) -> Result<()> {
        let source = self.camera.describe();
        emit_info(&self.events, format!("Connecting to camera {}", source));
        if let Err(err) = self.camera.open() {
            emit_warn(
                &self.events,
                format!("Failed to open camera {}: {:#}", source, err),
            );
            return Err(err.context(format!("open camera {}", source)));
        }
        emit_info(&self.events, format!("Camera connected: {}", source));

        let result = self.capture_loop();

        self.camera.close();
        emit_info(&self.events, format!("Camera released: {}", source));
        result
    }

    fn capture_loop(&mut self) -> Result<()> {
        while !self.shutdown.is_triggered() {
            match self.camera.read() {
                Ok(Capture::Frame(frame)) => {
                    self.metrics.record_capture();
                    match self.frames.send(frame) {
                        Ok(()) | Err(SendError::Full(_)) => {}
                        Err(SendError::Disconnected(_)) => {
                            log::debug!("capture: frame channel closed");
                            break;
                        }
                    }
                }
                Ok(Capture::EndOfStream) => std::thread::sleep(self.retry_backoff),
                Err(err) => {
                    emit_warn(&self.events, format!("Camera read failed: {:#}", err));
                    std::thread::sleep(self.retry_backoff);
                }
            }
        }
        Ok(())
    }
}
