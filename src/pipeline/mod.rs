//! The staged pipeline: capture → inference → persist → fan-out.
//!
//! Each stage runs on its own thread and talks to its neighbours only
//! through bounded drop-newest channels. All stages share one
//! [`ShutdownSignal`] and re-check it after every receive timeout, so the
//! receive timeout bounds how long a stage takes to notice a shutdown.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::channel::StageSender;
use crate::Event;

mod capture;
mod catalog;
mod fanout;
mod inference;
mod persist;
mod supervisor;

pub use catalog::ItemCatalog;
pub use supervisor::{
    Pipeline, PipelineReport, PipelineState, RunningPipeline, StageOutcome, StageStatus,
};

/// Cooperative cancellation flag. Written by the supervisor (or a signal
/// handler), read by every stage.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageId {
    Capture,
    Inference,
    Persist,
    Fanout,
}

impl StageId {
    pub const ALL: [StageId; 4] = [
        StageId::Capture,
        StageId::Inference,
        StageId::Persist,
        StageId::Fanout,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageId::Capture => "capture",
            StageId::Inference => "inference",
            StageId::Persist => "persist",
            StageId::Fanout => "fanout",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle message: mirrored to the log and queued as a `Log` event.
fn emit_info(events: &StageSender<Event>, message: String) {
    log::info!("{}", message);
    let _ = events.send(Event::log(message));
}

/// Failure message: mirrored to the log and queued as a `Log` event.
fn emit_warn(events: &StageSender<Event>, message: String) {
    log::warn!("{}", message);
    let _ = events.send(Event::log(message));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_signal_is_shared_between_clones() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_triggered());
        signal.trigger();
        assert!(observer.is_triggered());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 7");
        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static");
    }
}
