use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::annotate::EncodeFormat;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5050";
const DEFAULT_INDICES: [usize; 2] = [0, 1];
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 15;
const DEFAULT_DEVICE_TEMPLATE: &str = "/dev/video{index}";
const DEFAULT_SYNTHETIC_SUBJECTS: usize = 1;
const DEFAULT_DETECTOR: &str = "marker";
const DEFAULT_TARGET_CLASS: &str = "face";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_MIN_BOX_SIDE: u32 = 60;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_STATUS_LABEL: &str = "faces";
const MAX_BOUNDARY_LEN: usize = 70;

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    listen_addr: Option<String>,
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    encode: Option<EncodeConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    backend: Option<CaptureBackend>,
    indices: Option<Vec<usize>>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    device_template: Option<String>,
    synthetic_subjects: Option<usize>,
    synthetic_fail_after: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<String>,
    target_class: Option<String>,
    min_confidence: Option<f32>,
    min_width: Option<u32>,
    min_height: Option<u32>,
    model_path: Option<PathBuf>,
    model_width: Option<u32>,
    model_height: Option<u32>,
    class_labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct EncodeConfigFile {
    format: Option<EncodeFormat>,
    quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    boundary: Option<String>,
    subscriber_buffer: Option<usize>,
    status_label: Option<String>,
}

/// Which `FrameSource` implementation backs each camera index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    #[default]
    Synthetic,
    V4l2,
}

impl FromStr for CaptureBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "synthetic" => Ok(CaptureBackend::Synthetic),
            "v4l2" => Ok(CaptureBackend::V4l2),
            other => Err(anyhow!(
                "unknown capture backend '{}'; expected synthetic or v4l2",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub backend: CaptureBackend,
    pub indices: Vec<usize>,
    pub width: u32,
    pub height: u32,
    /// Frames per second to pace sources at; 0 disables pacing.
    pub target_fps: u32,
    /// Device path with an `{index}` placeholder.
    pub device_template: String,
    pub synthetic_subjects: usize,
    pub synthetic_fail_after: Option<u64>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::default(),
            indices: DEFAULT_INDICES.to_vec(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
            device_template: DEFAULT_DEVICE_TEMPLATE.to_string(),
            synthetic_subjects: DEFAULT_SYNTHETIC_SUBJECTS,
            synthetic_fail_after: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    /// Registry name of the detector backend; empty selects the registry default.
    pub backend: String,
    pub target_class: String,
    pub min_confidence: f32,
    pub min_width: u32,
    pub min_height: u32,
    pub model_path: Option<PathBuf>,
    pub model_width: u32,
    pub model_height: u32,
    pub class_labels: Vec<String>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR.to_string(),
            target_class: DEFAULT_TARGET_CLASS.to_string(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_width: DEFAULT_MIN_BOX_SIDE,
            min_height: DEFAULT_MIN_BOX_SIDE,
            model_path: None,
            model_width: DEFAULT_WIDTH,
            model_height: DEFAULT_HEIGHT,
            class_labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub format: EncodeFormat,
    pub quality: u8,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            format: EncodeFormat::Jpeg,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub boundary: String,
    pub subscriber_buffer: usize,
    /// Prefix of the per-camera keys in `/status`.
    pub status_label: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            boundary: crate::stream::DEFAULT_BOUNDARY.to_string(),
            subscriber_buffer: crate::stream::DEFAULT_SUBSCRIBER_BUFFER,
            status_label: DEFAULT_STATUS_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub capture: CaptureSettings,
    pub detection: DetectionSettings,
    pub encode: EncodeSettings,
    pub stream: StreamSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            capture: CaptureSettings::default(),
            detection: DetectionSettings::default(),
            encode: EncodeSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Defaults, then the file named by `RELAY_CONFIG`, then `RELAY_*` env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RELAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file in place of `RELAY_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Self {
        let defaults = RelayConfig::default();
        let capture = file.capture.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let encode = file.encode.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();

        Self {
            listen_addr: file.listen_addr.unwrap_or(defaults.listen_addr),
            capture: CaptureSettings {
                backend: capture.backend.unwrap_or(defaults.capture.backend),
                indices: capture.indices.unwrap_or(defaults.capture.indices),
                width: capture.width.unwrap_or(defaults.capture.width),
                height: capture.height.unwrap_or(defaults.capture.height),
                target_fps: capture.target_fps.unwrap_or(defaults.capture.target_fps),
                device_template: capture
                    .device_template
                    .unwrap_or(defaults.capture.device_template),
                synthetic_subjects: capture
                    .synthetic_subjects
                    .unwrap_or(defaults.capture.synthetic_subjects),
                synthetic_fail_after: capture.synthetic_fail_after,
            },
            detection: DetectionSettings {
                backend: detection.backend.unwrap_or(defaults.detection.backend),
                target_class: detection
                    .target_class
                    .unwrap_or(defaults.detection.target_class),
                min_confidence: detection
                    .min_confidence
                    .unwrap_or(defaults.detection.min_confidence),
                min_width: detection.min_width.unwrap_or(defaults.detection.min_width),
                min_height: detection.min_height.unwrap_or(defaults.detection.min_height),
                model_path: detection.model_path,
                model_width: detection
                    .model_width
                    .unwrap_or(defaults.detection.model_width),
                model_height: detection
                    .model_height
                    .unwrap_or(defaults.detection.model_height),
                class_labels: detection
                    .class_labels
                    .unwrap_or(defaults.detection.class_labels),
            },
            encode: EncodeSettings {
                format: encode.format.unwrap_or(defaults.encode.format),
                quality: encode.quality.unwrap_or(defaults.encode.quality),
            },
            stream: StreamSettings {
                boundary: stream.boundary.unwrap_or(defaults.stream.boundary),
                subscriber_buffer: stream
                    .subscriber_buffer
                    .unwrap_or(defaults.stream.subscriber_buffer),
                status_label: stream.status_label.unwrap_or(defaults.stream.status_label),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("RELAY_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(sources) = non_empty_env("RELAY_SOURCES") {
            self.capture.indices = parse_indices(&sources)
                .context("RELAY_SOURCES must be a comma-separated list of camera indices")?;
        }
        if let Some(backend) = non_empty_env("RELAY_CAPTURE_BACKEND") {
            self.capture.backend = backend.parse()?;
        }
        if let Some(detector) = non_empty_env("RELAY_DETECTOR") {
            self.detection.backend = detector;
        }
        if let Some(class) = non_empty_env("RELAY_TARGET_CLASS") {
            self.detection.target_class = class;
        }
        if let Some(confidence) = non_empty_env("RELAY_MIN_CONFIDENCE") {
            self.detection.min_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("RELAY_MIN_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Some(format) = non_empty_env("RELAY_ENCODE_FORMAT") {
            self.encode.format = format.parse()?;
        }
        if let Some(quality) = non_empty_env("RELAY_JPEG_QUALITY") {
            self.encode.quality = quality
                .trim()
                .parse()
                .map_err(|_| anyhow!("RELAY_JPEG_QUALITY must be an integer between 1 and 100"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(anyhow!("listen_addr must not be empty"));
        }
        if self.capture.indices.is_empty() {
            return Err(anyhow!("at least one camera index must be configured"));
        }
        let mut seen = HashSet::new();
        for index in &self.capture.indices {
            if !seen.insert(*index) {
                return Err(anyhow!("camera index {} is configured twice", index));
            }
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be non-zero"));
        }
        if self.detection.target_class.trim().is_empty() {
            return Err(anyhow!("detection.target_class must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(anyhow!(
                "detection.min_confidence must be within 0..=1, got {}",
                self.detection.min_confidence
            ));
        }
        if !(1..=100).contains(&self.encode.quality) {
            return Err(anyhow!(
                "encode.quality must be within 1..=100, got {}",
                self.encode.quality
            ));
        }
        validate_boundary(&self.stream.boundary)?;
        if self.stream.subscriber_buffer == 0 {
            return Err(anyhow!("stream.subscriber_buffer must be at least 1"));
        }
        if self.stream.status_label.trim().is_empty() {
            return Err(anyhow!("stream.status_label must not be empty"));
        }
        Ok(())
    }
}

/// Boundary tokens are restricted to a header-safe alphabet.
pub fn validate_boundary(boundary: &str) -> Result<()> {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(anyhow!(
            "stream.boundary must be 1..={} characters",
            MAX_BOUNDARY_LEN
        ));
    }
    if !boundary
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(anyhow!(
            "stream.boundary '{}' may only contain letters, digits, '-' and '_'",
            boundary
        ));
    }
    Ok(())
}

/// Parse `"0, 1,2"` into indices.
pub fn parse_indices(value: &str) -> Result<Vec<usize>> {
    split_csv(value)
        .iter()
        .map(|entry| {
            entry
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid camera index '{}'", entry))
        })
        .collect()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
