use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event as MqttEvent, MqttOptions};
use rumqttc::Transport;
use std::thread::JoinHandle;
use std::time::Duration;

use super::EventTransport;
use crate::Event;

const AVAILABILITY_TOPIC_SUFFIX: &str = "status";
const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
const REQUEST_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttSettings {
    pub broker_addr: String,
    pub topic_prefix: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker_addr: "127.0.0.1:1883".to_string(),
            topic_prefix: "fridge".to_string(),
            client_id: "fridged".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Publishes events to `<prefix>/events` with QoS 1.
///
/// Status snapshots are additionally retained on `<prefix>/stats`, and the
/// broker holds an `offline` last-will on `<prefix>/status`.
pub struct MqttTransport {
    client: Client,
    topic_prefix: String,
    availability_topic: String,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker_addr)?;
        let availability_topic =
            format!("{}/{}", settings.topic_prefix, AVAILABILITY_TOPIC_SUFFIX);

        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        let will = rumqttc::v5::mqttbytes::v5::LastWill::new(
            &availability_topic,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        );
        options.set_last_will(will);
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, REQUEST_CHANNEL_CAPACITY);
        let connection_handle = spawn_connection_driver(connection)?;
        log::info!(
            "MQTT transport connecting to {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );

        let transport = Self {
            client,
            topic_prefix: settings.topic_prefix.clone(),
            availability_topic,
            connection_handle: Some(connection_handle),
        };
        transport.publish_raw(&transport.availability_topic, PAYLOAD_ONLINE.as_bytes(), true)?;
        Ok(transport)
    }

    fn publish_raw(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .with_context(|| format!("publish to {}", topic))?;
        Ok(())
    }
}

fn spawn_connection_driver(mut connection: Connection) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("mqtt-connection".into())
        .spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(MqttEvent::Incoming(_)) | Ok(MqttEvent::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(handle)
}

impl EventTransport for MqttTransport {
    fn publish(&mut self, event: &Event) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        let events_topic = format!("{}/events", self.topic_prefix);
        self.publish_raw(&events_topic, &payload, false)?;

        if let Event::SystemStats { .. } = event {
            let stats_topic = format!("{}/stats", self.topic_prefix);
            self.publish_raw(&stats_topic, &payload, true)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.publish_raw(&self.availability_topic, PAYLOAD_OFFLINE.as_bytes(), true);
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

/// Parse `host:port`, optionally prefixed with `mqtt://`, `tcp://`,
/// `mqtts://` or `ssl://`. IPv6 hosts go in brackets.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}
