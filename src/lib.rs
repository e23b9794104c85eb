//! Fridge Watch
//!
//! This crate implements the staged pipeline behind `fridged`: frames are
//! captured from a camera, run through an object detector, deduplicated into a
//! persistent item catalog, and republished as a single ordered event stream
//! together with a once-per-second status snapshot.
//!
//! # Module Structure
//!
//! - `frame`: owned captured frames
//! - `channel`: bounded drop-newest channels between stages
//! - `ingest`: camera sources (synthetic, V4L2)
//! - `detect`: detector backends
//! - `storage`: item catalog stores (SQLite, in-memory)
//! - `transport`: event sinks (JSON lines, MQTT)
//! - `metrics`: rolling counters and the status snapshot
//! - `pipeline`: the four stages and the supervisor
//! - Core types: `RawDetection`, `ItemRecord`, `Event`

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod channel;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod transport;

pub use channel::{stage_channel, QueueGauge, RecvError, SendError, StageReceiver, StageSender};
pub use detect::{BackendRegistry, DemoBackend, DetectorBackend};
pub use frame::Frame;
pub use ingest::{open_camera, CameraSource, Capture, SyntheticCamera};
pub use metrics::{MetricsAggregator, MetricsSnapshot, QueueDepth};
pub use pipeline::{
    ItemCatalog, Pipeline, PipelineReport, PipelineState, RunningPipeline, ShutdownSignal,
    StageId,
};
pub use storage::{InMemoryItemStore, ItemStore, SqliteItemStore};
pub use transport::{EventTransport, JsonLinesTransport, MqttTransport};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> Result<u64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock before unix epoch"))?;
    u64::try_from(elapsed.as_millis()).map_err(|_| anyhow!("timestamp exceeds u64 range"))
}

/// Detection box in percent of the frame, each field within `[0, 100]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left: clamp_percent(left),
            top: clamp_percent(top),
            width: clamp_percent(width),
            height: clamp_percent(height),
        }
    }
}

fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// One unverified detector output.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub label: String,
    /// Within `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Capture time of the source frame, epoch milliseconds.
    pub timestamp: u64,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox, timestamp: u64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            label: label.into(),
            confidence,
            bbox,
            timestamp,
        }
    }
}

/// Persisted catalog entry. One per distinct `name`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_id: i64,
    pub name: String,
    pub first_seen: u64,
    pub last_seen: u64,
}

/// Everything the fan-out stage forwards to the transport.
///
/// Serialises with a `type` tag (`item_added`, `item_updated`, `log`,
/// `system_stats`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ItemAdded {
        item: ItemRecord,
        confidence: f32,
        bbox: BoundingBox,
    },
    ItemUpdated {
        item: ItemRecord,
        confidence: f32,
        bbox: BoundingBox,
    },
    Log {
        message: String,
    },
    SystemStats {
        stats: MetricsSnapshot,
    },
}

impl Event {
    pub fn log(message: impl Into<String>) -> Self {
        Event::Log {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::ItemAdded { .. } => "item_added",
            Event::ItemUpdated { .. } => "item_updated",
            Event::Log { .. } => "log",
            Event::SystemStats { .. } => "system_stats",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_is_clamped_to_percent_range() {
        let bbox = BoundingBox::new(-5.0, 50.0, 130.0, f32::NAN);
        assert_eq!(bbox.left, 0.0);
        assert_eq!(bbox.top, 50.0);
        assert_eq!(bbox.width, 100.0);
        assert_eq!(bbox.height, 0.0);
    }

    #[test]
    fn detection_confidence_is_clamped() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(RawDetection::new("apple", 1.4, bbox, 0).confidence, 1.0);
        assert_eq!(RawDetection::new("apple", -0.2, bbox, 0).confidence, 0.0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::ItemAdded {
            item: ItemRecord {
                item_id: 3,
                name: "apple".to_string(),
                first_seen: 10,
                last_seen: 10,
            },
            confidence: 0.8,
            bbox: BoundingBox::new(10.0, 20.0, 30.0, 40.0),
        };
        let json: serde_json::Value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "item_added");
        assert_eq!(json["item"]["name"], "apple");
        assert_eq!(json["bbox"]["left"], 10.0);

        let log = serde_json::to_value(Event::log("camera released")).expect("serialize");
        assert_eq!(log["type"], "log");
        assert_eq!(log["message"], "camera released");
    }

    #[test]
    fn now_ms_is_after_2020() {
        assert!(now_ms().expect("clock") > 1_577_836_800_000);
    }
}
