//! Camera frame sources for the scan engine.

pub mod mjpeg;
pub mod polling;
pub mod replay;

use async_trait::async_trait;
use scan_resolve_common::config::SourceConfig;
use scan_resolve_common::source::{FrameSource, SourceError, SourceOpener};
use std::time::Duration;

pub use mjpeg::{MjpegSource, MultipartParser};
pub use polling::PollingSource;
pub use replay::{ReplaySource, ReplayWriter};

/// Opens the source described by the `[source]` config section, once per
/// scanning session.
pub struct ConfiguredSource {
    config: SourceConfig,
}

impl ConfiguredSource {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    pub fn is_live(&self) -> bool {
        self.config.mode != "replay"
    }
}

#[async_trait]
impl SourceOpener for ConfiguredSource {
    async fn open(&self) -> Result<Box<dyn FrameSource>, SourceError> {
        let config = &self.config;
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

        match config.mode.as_str() {
            "mjpeg" => {
                let url = format!("{}?quality={}&fps={}", config.url, config.quality, config.fps);
                let source = MjpegSource::new(&url, connect_timeout, config.max_reconnects)?;
                Ok(Box::new(source))
            }
            "polling" => {
                let interval = polling_interval(config.fps)?;
                let url = format!(
                    "{}?quality={}",
                    config.url.replace("/stream", "/frame"),
                    config.quality
                );
                let source =
                    PollingSource::new(&url, interval, connect_timeout, config.max_reconnects)?;
                Ok(Box::new(source))
            }
            "replay" => {
                let path = config.replay_path.as_ref().ok_or_else(|| {
                    SourceError::Config("replay mode requires source.replay_path".into())
                })?;
                Ok(Box::new(ReplaySource::open(path, config.realtime).await?))
            }
            other => Err(SourceError::Config(format!(
                "unknown source mode '{other}', expected 'mjpeg', 'polling' or 'replay'"
            ))),
        }
    }
}

/// Snapshot period for a polling rate; rejects rates that do not map to a
/// non-zero `Duration`.
fn polling_interval(fps: f64) -> Result<Duration, SourceError> {
    if !fps.is_finite() || fps <= 0.0 {
        return Err(SourceError::Config(format!(
            "polling fps must be positive and finite, got {fps}"
        )));
    }
    match Duration::try_from_secs_f64(1.0 / fps) {
        Ok(interval) if !interval.is_zero() => Ok(interval),
        _ => Err(SourceError::Config(format!(
            "polling fps {fps} is out of range"
        ))),
    }
}
