use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use super::{emit_info, emit_warn, ItemCatalog, ShutdownSignal};
use crate::channel::{RecvError, SendError, StageReceiver, StageSender};
use crate::metrics::MetricsAggregator;
use crate::{Event, RawDetection};

pub(super) struct PersistStage {
    pub catalog: ItemCatalog,
    pub results: StageReceiver<RawDetection>,
    pub events: StageSender<Event>,
    pub metrics: Arc<MetricsAggregator>,
    pub shutdown: ShutdownSignal,
    pub recv_timeout: Duration,
}

impl PersistStage {
    pub fn run(mut self) -> Result<()> {
        match self.catalog.prime() {
            Ok(count) => {
                self.metrics.set_item_count(count);
                emit_info(
                    &self.events,
                    format!("Storage ready with {} known items", count),
                );
            }
            Err(err) => {
                emit_warn(&self.events, format!("Storage unavailable: {:#}", err));
                return Err(err);
            }
        }

        while !self.shutdown.is_triggered() {
            let detection = match self.results.recv_timeout(self.recv_timeout) {
                Ok(detection) => detection,
                Err(RecvError::Empty) => continue,
                Err(RecvError::Disconnected) => {
                    log::debug!("persist: result channel closed");
                    break;
                }
            };

            match self.catalog.resolve(&detection) {
                Ok(event) => {
                    self.metrics.set_item_count(self.catalog.item_count());
                    if let Event::ItemAdded { item, .. } = &event {
                        log::info!("new item {} (id {})", item.name, item.item_id);
                    }
                    match self.events.send(event) {
                        Ok(()) | Err(SendError::Full(_)) => {}
                        Err(SendError::Disconnected(_)) => {
                            log::debug!("persist: event channel closed");
                            break;
                        }
                    }
                }
                Err(err) => emit_warn(
                    &self.events,
                    format!("Failed to record {}: {:#}", detection.label, err),
                ),
            }
        }

        emit_info(&self.events, "Storage closed".to_string());
        Ok(())
    }
}
