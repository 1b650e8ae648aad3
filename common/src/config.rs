use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-session scanning behaviour. `sample_every_n_frames` and
/// `confidence_threshold` form the [`RateConfig`] of a session.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_sample_every_n_frames")]
    pub sample_every_n_frames: u32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Keep detecting while a record is displayed so a different code replaces it.
    #[serde(default)]
    pub continuous_rescan: bool,
    #[serde(default = "default_detection_timeout_ms")]
    pub detection_timeout_ms: u64,
    /// Emit per-frame diagnostic events (below threshold, misses, failures).
    #[serde(default = "default_true")]
    pub diagnostics: bool,
    /// Drop sampled frames while a detection is in flight instead of waiting.
    #[serde(default = "default_true")]
    pub drop_when_busy: bool,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sample_every_n_frames: default_sample_every_n_frames(),
            confidence_threshold: default_confidence_threshold(),
            continuous_rescan: false,
            detection_timeout_ms: default_detection_timeout_ms(),
            diagnostics: true,
            drop_when_busy: true,
            event_capacity: default_event_capacity(),
        }
    }
}

impl ScanConfig {
    pub fn rate(&self) -> Result<RateConfig, ConfigError> {
        RateConfig::new(self.sample_every_n_frames, self.confidence_threshold)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default)]
    pub replay_path: Option<PathBuf>,
    /// Pace replayed frames by their capture timestamps.
    #[serde(default)]
    pub realtime: bool,
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_kind")]
    pub kind: String,
    /// Base URL of the OCR service for `remote-text`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: default_detector_kind(),
            endpoint: None,
            languages: default_languages(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String,
    pub path: PathBuf,
    /// When set, decoded URLs are resolved by this query parameter.
    #[serde(default)]
    pub key_param: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Sampling rate and confidence floor for one scanning session.
///
/// Only changeable while the engine is idle; a running session keeps the
/// values it was started with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    pub sample_every_n_frames: u32,
    pub confidence_threshold: f32,
}

impl RateConfig {
    pub fn new(sample_every_n_frames: u32, confidence_threshold: f32) -> Result<Self, ConfigError> {
        let rate = Self {
            sample_every_n_frames,
            confidence_threshold,
        };
        rate.validate()?;
        Ok(rate)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_every_n_frames < 1 {
            return Err(ConfigError::SampleRate(self.sample_every_n_frames));
        }
        // NaN fails the range check as well.
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Threshold(self.confidence_threshold));
        }
        Ok(())
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            sample_every_n_frames: default_sample_every_n_frames(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.scan.rate()?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("sample_every_n_frames must be at least 1, got {0}")]
    SampleRate(u32),
    #[error("confidence_threshold must be within [0, 1], got {0}")]
    Threshold(f32),
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_sample_every_n_frames() -> u32 {
    5
}
fn default_confidence_threshold() -> f32 {
    0.2
}
fn default_detection_timeout_ms() -> u64 {
    2000
}
fn default_event_capacity() -> usize {
    64
}
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_fps() -> f64 {
    10.0
}
fn default_quality() -> u32 {
    80
}
fn default_max_reconnects() -> u32 {
    3
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_detector_kind() -> String {
    "qr".into()
}
fn default_languages() -> Vec<String> {
    vec!["en".into()]
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_store_backend() -> String {
    "toml".into()
}
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}
