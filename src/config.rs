use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::transport::MqttSettings;

const DEFAULT_DB_PATH: &str = "fridge.db";
const DEFAULT_CAMERA_URL: &str = "stub://fridge";
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
const DEFAULT_DETECTOR_BACKEND: &str = "demo";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_DETECTION_INTERVAL_SECS: u64 = 5;
const DEFAULT_FRAME_CAPACITY: usize = 30;
const DEFAULT_RESULT_CAPACITY: usize = 30;
const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_RECV_TIMEOUT_MS: u64 = 500;
const DEFAULT_STAGE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_STATS_INTERVAL_MS: u64 = 1000;
const MAX_RECV_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FridgeConfigFile {
    db_path: Option<String>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    transport: Option<TransportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    min_confidence: Option<f32>,
    detection_interval_secs: Option<u64>,
    language: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    frame_capacity: Option<usize>,
    result_capacity: Option<usize>,
    event_capacity: Option<usize>,
    recv_timeout_ms: Option<u64>,
    stage_timeout_ms: Option<u64>,
    stats_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TransportConfigFile {
    kind: Option<String>,
    mqtt_broker_addr: Option<String>,
    mqtt_topic_prefix: Option<String>,
    mqtt_client_id: Option<String>,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FridgeConfig {
    pub db_path: String,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub pipeline: PipelineSettings,
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Pause after a failed read before trying again.
    pub retry_backoff: Duration,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CAMERA_URL.to_string(),
            target_fps: DEFAULT_CAMERA_FPS,
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

/// Language used for item names reported by the demo backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Japanese,
    English,
}

impl Language {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ja" | "japanese" => Ok(Self::Japanese),
            "en" | "english" => Ok(Self::English),
            other => Err(anyhow!("unknown detector language: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    /// Detections below this confidence never reach the result channel.
    pub min_confidence: f32,
    pub detection_interval: Duration,
    pub language: Language,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            detection_interval: Duration::from_secs(DEFAULT_DETECTION_INTERVAL_SECS),
            language: Language::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub frame_capacity: usize,
    pub result_capacity: usize,
    pub event_capacity: usize,
    /// Upper bound on every blocking receive, and so on shutdown latency.
    pub recv_timeout: Duration,
    /// Drain deadline shared by all stages.
    pub stage_timeout: Duration,
    pub stats_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            result_capacity: DEFAULT_RESULT_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            recv_timeout: Duration::from_millis(DEFAULT_RECV_TIMEOUT_MS),
            stage_timeout: Duration::from_millis(DEFAULT_STAGE_TIMEOUT_MS),
            stats_interval: Duration::from_millis(DEFAULT_STATS_INTERVAL_MS),
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.frame_capacity == 0 || self.result_capacity == 0 || self.event_capacity == 0 {
            return Err(anyhow!("channel capacities must be greater than zero"));
        }
        if self.recv_timeout.is_zero() || self.recv_timeout > MAX_RECV_TIMEOUT {
            return Err(anyhow!(
                "recv_timeout must be between 1ms and {}ms",
                MAX_RECV_TIMEOUT.as_millis()
            ));
        }
        if self.stage_timeout.is_zero() {
            return Err(anyhow!("stage_timeout must be greater than zero"));
        }
        if self.stats_interval.is_zero() {
            return Err(anyhow!("stats_interval must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Stdout,
    Mqtt,
}

impl TransportKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "mqtt" => Ok(Self::Mqtt),
            other => Err(anyhow!("unknown transport kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportSettings {
    pub kind: TransportKind,
    pub mqtt: MqttSettings,
}

impl FridgeConfig {
    /// Load from the TOML file named by `FRIDGE_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRIDGE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `FRIDGE_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FridgeConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            url: camera_file
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            retry_backoff: Duration::from_millis(
                camera_file
                    .retry_backoff_ms
                    .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            min_confidence: detector_file
                .min_confidence
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            detection_interval: Duration::from_secs(
                detector_file
                    .detection_interval_secs
                    .unwrap_or(DEFAULT_DETECTION_INTERVAL_SECS),
            ),
            language: match detector_file.language.as_deref() {
                Some(language) => Language::parse(language)?,
                None => Language::default(),
            },
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            frame_capacity: pipeline_file
                .frame_capacity
                .unwrap_or(DEFAULT_FRAME_CAPACITY),
            result_capacity: pipeline_file
                .result_capacity
                .unwrap_or(DEFAULT_RESULT_CAPACITY),
            event_capacity: pipeline_file
                .event_capacity
                .unwrap_or(DEFAULT_EVENT_CAPACITY),
            recv_timeout: Duration::from_millis(
                pipeline_file
                    .recv_timeout_ms
                    .unwrap_or(DEFAULT_RECV_TIMEOUT_MS),
            ),
            stage_timeout: Duration::from_millis(
                pipeline_file
                    .stage_timeout_ms
                    .unwrap_or(DEFAULT_STAGE_TIMEOUT_MS),
            ),
            stats_interval: Duration::from_millis(
                pipeline_file
                    .stats_interval_ms
                    .unwrap_or(DEFAULT_STATS_INTERVAL_MS),
            ),
        };

        let transport_file = file.transport.unwrap_or_default();
        let mqtt_defaults = MqttSettings::default();
        let transport = TransportSettings {
            kind: match transport_file.kind.as_deref() {
                Some(kind) => TransportKind::parse(kind)?,
                None => TransportKind::default(),
            },
            mqtt: MqttSettings {
                broker_addr: transport_file
                    .mqtt_broker_addr
                    .unwrap_or(mqtt_defaults.broker_addr),
                topic_prefix: transport_file
                    .mqtt_topic_prefix
                    .unwrap_or(mqtt_defaults.topic_prefix),
                client_id: transport_file
                    .mqtt_client_id
                    .unwrap_or(mqtt_defaults.client_id),
                username: transport_file.mqtt_username,
                password: transport_file.mqtt_password,
            },
        };

        Ok(Self {
            db_path,
            camera,
            detector,
            pipeline,
            transport,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("FRIDGE_DB_PATH") {
            self.db_path = path;
        }
        if let Some(url) = non_empty_env("FRIDGE_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(backend) = non_empty_env("FRIDGE_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(confidence) = non_empty_env("FRIDGE_MIN_CONFIDENCE") {
            self.detector.min_confidence = confidence
                .parse()
                .map_err(|_| anyhow!("FRIDGE_MIN_CONFIDENCE must be a number"))?;
        }
        if let Some(kind) = non_empty_env("FRIDGE_TRANSPORT") {
            self.transport.kind = TransportKind::parse(&kind)?;
        }
        if let Some(addr) = non_empty_env("MQTT_BROKER_ADDR") {
            self.transport.mqtt.broker_addr = addr;
        }
        if let Some(user) = non_empty_env("MQTT_USERNAME") {
            self.transport.mqtt.username = Some(user);
        }
        if let Some(password) = non_empty_env("MQTT_PASSWORD") {
            self.transport.mqtt.password = Some(password);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!("min_confidence must be within [0, 1]"));
        }
        if self.detector.detection_interval.is_zero() {
            return Err(anyhow!("detection_interval_secs must be greater than zero"));
        }
        self.pipeline.validate()?;
        if self.transport.kind == TransportKind::Mqtt {
            crate::transport::parse_mqtt_endpoint(&self.transport.mqtt.broker_addr)?;
            if self.transport.mqtt.topic_prefix.trim().is_empty() {
                return Err(anyhow!("mqtt_topic_prefix must not be empty"));
            }
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<FridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_defaults_are_valid() {
        assert!(PipelineSettings::default().validate().is_ok());
    }

    #[test]
    fn receive_timeout_is_capped_at_one_second() {
        let settings = PipelineSettings {
            recv_timeout: Duration::from_millis(1500),
            ..PipelineSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let settings = PipelineSettings {
            result_capacity: 0,
            ..PipelineSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn parses_languages_and_transports() {
        assert_eq!(Language::parse("EN").ok(), Some(Language::English));
        assert_eq!(Language::parse("ja").ok(), Some(Language::Japanese));
        assert!(Language::parse("fr").is_err());
        assert_eq!(TransportKind::parse("mqtt").ok(), Some(TransportKind::Mqtt));
        assert!(TransportKind::parse("websocket").is_err());
    }
}
