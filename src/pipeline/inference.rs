use anyhow::Result;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{emit_info, emit_warn, panic_message, ShutdownSignal};
use crate::channel::{RecvError, SendError, StageReceiver, StageSender};
use crate::detect::DetectorBackend;
use crate::frame::Frame;
use crate::metrics::MetricsAggregator;
use crate::{Event, RawDetection};

pub(super) struct InferenceStage {
    pub detector: Box<dyn DetectorBackend>,
    pub frames: StageReceiver<Frame>,
    pub results: StageSender<RawDetection>,
    pub events: StageSender<Event>,
    pub metrics: Arc<MetricsAggregator>,
    pub shutdown: ShutdownSignal,
    pub min_confidence: f32,
    pub recv_timeout: Duration,
}

enum Forwarded {
    Continue,
    DownstreamClosed,
}

impl InferenceStage {
    pub fn run(mut self) -> Result<()> {
        if let Err(err) = self.detector.warm_up() {
            emit_warn(
                &self.events,
                format!("Failed to initialise model {}: {:#}", self.detector.name(), err),
            );
            return Err(err.context("warm up detector"));
        }
        let model_info = self.detector.describe();
        self.metrics.set_model_info(model_info.clone());
        emit_info(&self.events, format!("Model initialised: {}", model_info));

        while !self.shutdown.is_triggered() {
            let frame = match self.frames.recv_timeout(self.recv_timeout) {
                Ok(frame) => frame,
                Err(RecvError::Empty) => continue,
                Err(RecvError::Disconnected) => {
                    log::debug!("inference: frame channel closed");
                    break;
                }
            };
            if let Forwarded::DownstreamClosed = self.process(&frame) {
                log::debug!("inference: result channel closed");
                break;
            }
        }
        Ok(())
    }

    fn process(&mut self, frame: &Frame) -> Forwarded {
        let started = Instant::now();
        let detector = &mut self.detector;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame)));
        self.metrics.record_inference(started.elapsed());

        let detections = match outcome {
            Ok(Ok(detections)) => detections,
            Ok(Err(err)) => {
                emit_warn(
                    &self.events,
                    format!("Inference failed on frame {}: {:#}", frame.sequence, err),
                );
                return Forwarded::Continue;
            }
            Err(payload) => {
                emit_warn(
                    &self.events,
                    format!(
                        "Detector panicked on frame {}: {}",
                        frame.sequence,
                        panic_message(&*payload)
                    ),
                );
                return Forwarded::Continue;
            }
        };

        for detection in detections {
            if detection.confidence < self.min_confidence {
                continue;
            }
            match self.results.send(detection) {
                Ok(()) | Err(SendError::Full(_)) => {}
                Err(SendError::Disconnected(_)) => return Forwarded::DownstreamClosed,
            }
        }
        Forwarded::Continue
    }
}
