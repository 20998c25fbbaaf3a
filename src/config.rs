use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::command::CommandTopics;
use crate::controller::ControllerSettings;
use crate::frame::CameraId;
use crate::record::{Codec, RecordingSettings};

const DEFAULT_APP_NAME: &str = "avsim-cam";
const DEFAULT_CAMERA_IDS: [u32; 4] = [0, 2, 4, 6];
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_OUTPUT_DIR: &str = "video";
const DEFAULT_RECORD_FPS: u32 = 30;
const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    app_name: Option<String>,
    close_timeout_ms: Option<u64>,
    cameras: Option<CamerasConfigFile>,
    recording: Option<RecordingConfigFile>,
    broker: Option<BrokerConfigFile>,
    topics: Option<TopicsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CamerasConfigFile {
    ids: Option<Vec<CameraId>>,
    backend: Option<SourceBackend>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    synthetic_available: Option<Vec<CameraId>>,
    synthetic_frame_limit: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    output_dir: Option<PathBuf>,
    target_fps: Option<u32>,
    codec: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct BrokerConfigFile {
    addr: Option<String>,
    client_id: Option<String>,
    keep_alive_secs: Option<u64>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TopicsConfigFile {
    record_start: Option<String>,
    record_stop: Option<String>,
    request_active: Option<String>,
    presence: Option<String>,
}

/// Capture device backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceBackend {
    Synthetic,
    V4l2,
}

impl Default for SourceBackend {
    fn default() -> Self {
        if cfg!(feature = "ingest-v4l2") {
            SourceBackend::V4l2
        } else {
            SourceBackend::Synthetic
        }
    }
}

impl fmt::Display for SourceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceBackend::Synthetic => f.write_str("synthetic"),
            SourceBackend::V4l2 => f.write_str("v4l2"),
        }
    }
}

impl FromStr for SourceBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "synthetic" | "stub" => Ok(SourceBackend::Synthetic),
            "v4l2" => Ok(SourceBackend::V4l2),
            other => Err(anyhow!(
                "unknown camera backend '{}': expected 'synthetic' or 'v4l2'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub app_name: String,
    pub close_timeout: Duration,
    pub cameras: CameraSettings,
    pub recording: RecordingSettings,
    pub broker: BrokerSettings,
    pub topics: CommandTopics,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub ids: Vec<CameraId>,
    pub backend: SourceBackend,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Synthetic backend only: ids that have a device.
    pub synthetic_available: Option<Vec<CameraId>>,
    /// Synthetic backend only: end every stream after this many frames.
    pub synthetic_frame_limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub addr: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
}

impl RecorderConfig {
    /// Load from the file named by `CABINCAM_CONFIG` (if set), then apply
    /// env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CABINCAM_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

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

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            recording: self.recording.clone(),
            close_timeout: self.close_timeout,
        }
    }

    fn from_file(file: RecorderConfigFile) -> Result<Self> {
        let app_name = file
            .app_name
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
        let close_timeout = Duration::from_millis(
            file.close_timeout_ms
                .unwrap_or(DEFAULT_CLOSE_TIMEOUT_MS),
        );

        let cameras_file = file.cameras.unwrap_or_default();
        let cameras = CameraSettings {
            ids: cameras_file
                .ids
                .unwrap_or_else(|| DEFAULT_CAMERA_IDS.iter().copied().map(CameraId).collect()),
            backend: cameras_file.backend.unwrap_or_default(),
            width: cameras_file.width.unwrap_or(DEFAULT_WIDTH),
            height: cameras_file.height.unwrap_or(DEFAULT_HEIGHT),
            fps: cameras_file.fps.unwrap_or(DEFAULT_FPS),
            synthetic_available: cameras_file.synthetic_available,
            synthetic_frame_limit: cameras_file.synthetic_frame_limit,
        };

        let recording_file = file.recording.unwrap_or_default();
        let codec = match recording_file.codec.as_deref() {
            Some(name) => name.parse::<Codec>()?,
            None => Codec::default(),
        };
        let recording = RecordingSettings {
            output_root: recording_file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            target_fps: recording_file.target_fps.unwrap_or(DEFAULT_RECORD_FPS),
            codec,
        };

        let broker_file = file.broker.unwrap_or_default();
        let broker = BrokerSettings {
            addr: broker_file
                .addr
                .unwrap_or_else(|| DEFAULT_BROKER_ADDR.to_string()),
            client_id: broker_file.client_id.unwrap_or_else(|| app_name.clone()),
            keep_alive: Duration::from_secs(
                broker_file
                    .keep_alive_secs
                    .unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
            reconnect_delay: Duration::from_millis(
                broker_file
                    .reconnect_delay_ms
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
        };

        let defaults = CommandTopics::default();
        let topics_file = file.topics.unwrap_or_default();
        let topics = CommandTopics {
            record_start: topics_file.record_start.unwrap_or(defaults.record_start),
            record_stop: topics_file.record_stop.unwrap_or(defaults.record_stop),
            request_active: topics_file
                .request_active
                .unwrap_or(defaults.request_active),
            presence: topics_file.presence.unwrap_or(defaults.presence),
        };

        Ok(Self {
            app_name,
            close_timeout,
            cameras,
            recording,
            broker,
            topics,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(name) = std::env::var("CABINCAM_APP_NAME") {
            if !name.trim().is_empty() {
                self.app_name = name.trim().to_string();
            }
        }
        if let Ok(ids) = std::env::var("CABINCAM_CAMERAS") {
            let parsed = parse_camera_ids(&ids)?;
            if !parsed.is_empty() {
                self.cameras.ids = parsed;
            }
        }
        if let Ok(backend) = std::env::var("CABINCAM_BACKEND") {
            if !backend.trim().is_empty() {
                self.cameras.backend = backend.parse()?;
            }
        }
        if let Ok(dir) = std::env::var("CABINCAM_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.recording.output_root = PathBuf::from(dir);
            }
        }
        if let Ok(fps) = std::env::var("CABINCAM_RECORD_FPS") {
            self.recording.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("CABINCAM_RECORD_FPS must be an integer frame rate"))?;
        }
        if let Ok(codec) = std::env::var("CABINCAM_CODEC") {
            if !codec.trim().is_empty() {
                self.recording.codec = codec.parse()?;
            }
        }
        if let Ok(addr) = std::env::var("CABINCAM_BROKER") {
            if !addr.trim().is_empty() {
                self.broker.addr = addr.trim().to_string();
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.app_name = self.app_name.trim().to_string();
        if self.app_name.is_empty() {
            return Err(anyhow!("app_name must not be empty"));
        }
        if self.cameras.ids.is_empty() {
            return Err(anyhow!("at least one camera id must be configured"));
        }
        let mut seen = BTreeSet::new();
        for id in &self.cameras.ids {
            if !seen.insert(*id) {
                return Err(anyhow!("camera id {} is configured twice", id));
            }
        }
        if self.cameras.width == 0 || self.cameras.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.recording.target_fps == 0 {
            return Err(anyhow!("recording target_fps must be greater than zero"));
        }
        if !self.recording.codec.is_available() {
            return Err(anyhow!(
                "codec '{}' is not available in this build (enable the record-ffmpeg feature)",
                self.recording.codec
            ));
        }
        if self.close_timeout.is_zero() {
            return Err(anyhow!("close_timeout_ms must be greater than zero"));
        }
        if self.broker.client_id.trim().is_empty() {
            return Err(anyhow!("broker client_id must not be empty"));
        }
        for (name, topic) in [
            ("record_start", &self.topics.record_start),
            ("record_stop", &self.topics.record_stop),
            ("request_active", &self.topics.request_active),
            ("presence", &self.topics.presence),
        ] {
            if topic.trim().is_empty() {
                return Err(anyhow!("topic {} must not be empty", name));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RecorderConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Parse a comma separated id list such as `0,2,4,6`.
pub fn parse_camera_ids(value: &str) -> Result<Vec<CameraId>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<CameraId>()
                .map_err(|_| anyhow!("invalid camera id '{}'", entry))
        })
        .collect()
}
