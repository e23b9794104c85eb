//! Outbound event transports.
//!
//! The fan-out stage hands every event to exactly one `EventTransport`.
//! Delivery is fire-and-forget: a failed publish is logged by the caller and
//! the stream carries on.
//!
//! - `JsonLinesTransport`: one JSON object per line on stdout (or any writer)
//! - `MqttTransport`: QoS 1 publishes to an MQTT broker

use anyhow::Result;
use std::io::Write;

use crate::Event;

mod mqtt;

pub use mqtt::{parse_mqtt_endpoint, MqttEndpoint, MqttSettings, MqttTransport};

pub trait EventTransport: Send {
    fn publish(&mut self, event: &Event) -> Result<()>;

    /// Flush and release the transport.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes each event as a single line of JSON.
pub struct JsonLinesTransport<W: Write + Send> {
    writer: W,
}

impl JsonLinesTransport<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLinesTransport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventTransport for JsonLinesTransport<W> {
    fn publish(&mut self, event: &Event) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
