use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::capture::CaptureStage;
use super::fanout::FanoutStage;
use super::inference::InferenceStage;
use super::persist::PersistStage;
use super::{panic_message, ItemCatalog, ShutdownSignal, StageId};
use crate::channel::stage_channel;
use crate::config::PipelineSettings;
use crate::detect::DetectorBackend;
use crate::ingest::CameraSource;
use crate::metrics::MetricsAggregator;
use crate::storage::ItemStore;
use crate::transport::EventTransport;

const EXIT_CLEAN: i32 = 0;
const EXIT_STAGE_FAILED: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    Failed(String),
    /// Still running when the drain deadline passed; its thread was detached.
    Abandoned,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: StageId,
    pub status: StageStatus,
}

/// What happened during one pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineReport {
    pub state: PipelineState,
    /// The stage whose exit while `Running` forced the drain.
    pub failed_stage: Option<StageId>,
    pub stages: Vec<StageOutcome>,
    pub drain_duration: Duration,
}

impl PipelineReport {
    pub fn abandoned(&self) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|outcome| outcome.status == StageStatus::Abandoned)
            .map(|outcome| outcome.stage)
            .collect()
    }

    pub fn status(&self, stage: StageId) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|outcome| outcome.stage == stage)
            .map(|outcome| &outcome.status)
    }

    /// 0 for a clean shutdown, 2 if a stage failed.
    pub fn exit_code(&self) -> i32 {
        let any_failed = self
            .stages
            .iter()
            .any(|outcome| matches!(outcome.status, StageStatus::Failed(_)));
        if self.failed_stage.is_some() || any_failed {
            EXIT_STAGE_FAILED
        } else {
            EXIT_CLEAN
        }
    }
}

/// A fully wired pipeline that has not been started yet.
pub struct Pipeline {
    settings: PipelineSettings,
    min_confidence: f32,
    retry_backoff: Duration,
    camera: Box<dyn CameraSource>,
    detector: Box<dyn DetectorBackend>,
    store: Box<dyn ItemStore>,
    transport: Box<dyn EventTransport>,
    metrics: Arc<MetricsAggregator>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        camera: Box<dyn CameraSource>,
        detector: Box<dyn DetectorBackend>,
        store: Box<dyn ItemStore>,
        transport: Box<dyn EventTransport>,
    ) -> Self {
        Self {
            settings,
            min_confidence: 0.0,
            retry_backoff: Duration::from_millis(100),
            camera,
            detector,
            store,
            transport,
            metrics: Arc::new(MetricsAggregator::new()),
        }
    }

    /// Detections below this confidence are dropped before persistence.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        self.metrics.clone()
    }

    /// Start and block until shutdown is requested or a stage exits.
    pub fn run(self, shutdown: ShutdownSignal) -> Result<PipelineReport> {
        Ok(self.start(shutdown)?.wait())
    }

    /// Build the channels and spawn one worker per stage.
    pub fn start(self, shutdown: ShutdownSignal) -> Result<RunningPipeline> {
        self.settings.validate()?;
        let settings = self.settings;

        let (frames_tx, frames_rx) = stage_channel("frames", settings.frame_capacity);
        let (results_tx, results_rx) = stage_channel("results", settings.result_capacity);
        let (events_tx, events_rx) = stage_channel("events", settings.event_capacity);
        self.metrics.watch_queue(frames_rx.gauge());
        self.metrics.watch_queue(results_rx.gauge());
        self.metrics.watch_queue(events_rx.gauge());

        let (exit_tx, exit_rx) = crossbeam_channel::unbounded();
        let mut running = RunningPipeline {
            shutdown: shutdown.clone(),
            exits: exit_rx,
            workers: Vec::with_capacity(StageId::ALL.len()),
            outcomes: Vec::with_capacity(StageId::ALL.len()),
            stage_timeout: settings.stage_timeout,
            poll_interval: settings.recv_timeout,
            metrics: self.metrics.clone(),
        };

        let fanout = FanoutStage {
            transport: self.transport,
            events: events_rx,
            metrics: self.metrics.clone(),
            shutdown: shutdown.clone(),
            recv_timeout: settings.recv_timeout,
            stats_interval: settings.stats_interval,
            flush_grace: settings.stage_timeout / 2,
        };
        running.spawn(StageId::Fanout, &exit_tx, move || fanout.run())?;

        let persist = PersistStage {
            catalog: ItemCatalog::new(self.store),
            results: results_rx,
            events: events_tx.clone(),
            metrics: self.metrics.clone(),
            shutdown: shutdown.clone(),
            recv_timeout: settings.recv_timeout,
        };
        running.spawn(StageId::Persist, &exit_tx, move || persist.run())?;

        let inference = InferenceStage {
            detector: self.detector,
            frames: frames_rx,
            results: results_tx,
            events: events_tx.clone(),
            metrics: self.metrics.clone(),
            shutdown: shutdown.clone(),
            min_confidence: self.min_confidence,
            recv_timeout: settings.recv_timeout,
        };
        running.spawn(StageId::Inference, &exit_tx, move || inference.run())?;

        let capture = CaptureStage {
            camera: self.camera,
            frames: frames_tx,
            events: events_tx,
            metrics: self.metrics.clone(),
            shutdown,
            retry_backoff: self.retry_backoff,
        };
        running.spawn(StageId::Capture, &exit_tx, move || capture.run())?;

        log::info!("pipeline running with {} stages", running.workers.len());
        Ok(running)
    }
}

struct StageExit {
    stage: StageId,
    result: Result<()>,
}

/// Handle to a started pipeline.
pub struct RunningPipeline {
    shutdown: ShutdownSignal,
    exits: Receiver<StageExit>,
    workers: Vec<(StageId, JoinHandle<()>)>,
    outcomes: Vec<StageOutcome>,
    stage_timeout: Duration,
    poll_interval: Duration,
    metrics: Arc<MetricsAggregator>,
}

impl RunningPipeline {
    fn spawn<F>(&mut self, stage: StageId, exits: &Sender<StageExit>, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let exits = exits.clone();
        let spawned = thread::Builder::new()
            .name(format!("fridge-{}", stage))
            .spawn(move || {
                let result = match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(result) => result,
                    Err(payload) => Err(anyhow!("stage panicked: {}", panic_message(&*payload))),
                };
                let _ = exits.send(StageExit { stage, result });
            })
            .with_context(|| format!("spawn {} stage", stage));

        match spawned {
            Ok(handle) => {
                self.workers.push((stage, handle));
                Ok(())
            }
            Err(err) => {
                self.shutdown.trigger();
                Err(err)
            }
        }
    }

    pub fn state(&self) -> PipelineState {
        if self.shutdown.is_triggered() {
            PipelineState::Draining
        } else {
            PipelineState::Running
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        self.metrics.clone()
    }

    /// Block until the shutdown signal is set or any stage exits, then drain.
    pub fn wait(mut self) -> PipelineReport {
        let mut failed_stage = None;
        while !self.shutdown.is_triggered() {
            match self.exits.recv_timeout(self.poll_interval) {
                Ok(exit) => {
                    // Stages see an external shutdown before this loop does;
                    // their exits then belong to the drain.
                    if self.shutdown.is_triggered() {
                        self.record(exit);
                        break;
                    }
                    match &exit.result {
                        Ok(()) => log::warn!("{} stage exited while running", exit.stage),
                        Err(err) => log::error!("{} stage failed: {:#}", exit.stage, err),
                    }
                    failed_stage = Some(exit.stage);
                    self.record(exit);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.drain(failed_stage)
    }

    /// Request shutdown now and drain.
    pub fn shutdown(self) -> PipelineReport {
        self.shutdown.trigger();
        self.wait()
    }

    fn record(&mut self, exit: StageExit) {
        let status = match exit.result {
            Ok(()) => StageStatus::Completed,
            Err(err) => StageStatus::Failed(format!("{:#}", err)),
        };
        self.outcomes.push(StageOutcome {
            stage: exit.stage,
            status,
        });
    }

    fn drain(mut self, failed_stage: Option<StageId>) -> PipelineReport {
        log::info!("pipeline draining");
        self.shutdown.trigger();
        let started = Instant::now();
        let deadline = started + self.stage_timeout;

        while self.outcomes.len() < self.workers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.exits.recv_timeout(remaining) {
                Ok(exit) => {
                    if let Err(err) = &exit.result {
                        log::warn!("{} stage failed during drain: {:#}", exit.stage, err);
                    }
                    self.record(exit);
                }
                Err(_) => break,
            }
        }

        let workers = std::mem::take(&mut self.workers);
        for (stage, handle) in workers {
            if self.outcomes.iter().any(|outcome| outcome.stage == stage) {
                let _ = handle.join();
            } else {
                log::warn!(
                    "{} stage did not stop within {:?}; abandoning it",
                    stage,
                    self.stage_timeout
                );
                self.outcomes.push(StageOutcome {
                    stage,
                    status: StageStatus::Abandoned,
                });
            }
        }
        self.outcomes
            .sort_by_key(|outcome| StageId::ALL.iter().position(|id| *id == outcome.stage));

        let drain_duration = started.elapsed();
        log::info!("pipeline stopped after {:?} drain", drain_duration);
        PipelineReport {
            state: PipelineState::Stopped,
            failed_stage,
            stages: self.outcomes,
            drain_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stage: StageId, status: StageStatus) -> StageOutcome {
        StageOutcome { stage, status }
    }

    #[test]
    fn exit_code_reflects_stage_failures() {
        let mut report = PipelineReport {
            state: PipelineState::Stopped,
            failed_stage: None,
            stages: StageId::ALL
                .iter()
                .map(|stage| outcome(*stage, StageStatus::Completed))
                .collect(),
            drain_duration: Duration::ZERO,
        };
        assert_eq!(report.exit_code(), 0);

        report.stages[3] = outcome(StageId::Fanout, StageStatus::Abandoned);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.abandoned(), vec![StageId::Fanout]);

        report.failed_stage = Some(StageId::Capture);
        assert_eq!(report.exit_code(), 2);
    }
}
