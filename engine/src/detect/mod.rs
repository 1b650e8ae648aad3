//! Detector boundary: text (OCR) and code (QR) recognition behind one trait.

pub mod luma;
pub mod qr;
pub mod remote;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use scan_resolve_common::config::DetectorConfig;
use scan_resolve_common::frame::Frame;
use serde::Serialize;
use std::time::Duration;

use crate::error::DetectionError;

pub use qr::QrCodeAdapter;
pub use remote::RemoteTextAdapter;
pub use scripted::ScriptedAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One decoded result from one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub decoded_value: String,
    /// Corner points in detector order; absent for text without geometry.
    pub region: Option<[Point; 4]>,
    /// In [0, 1]. Code detectors leave this unset: a code either decodes or not.
    pub confidence: Option<f32>,
}

impl Detection {
    pub fn text(value: impl Into<String>, confidence: f32) -> Self {
        Self {
            decoded_value: value.into(),
            region: None,
            confidence: Some(confidence),
        }
    }

    pub fn code(value: impl Into<String>, region: Option<[Point; 4]>) -> Self {
        Self {
            decoded_value: value.into(),
            region,
            confidence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Text,
    Code,
}

/// A warmed-up detector.
///
/// Implementations do their expensive setup (model load, connection warm-up)
/// when constructed and are then reused for every frame of every session.
/// `detect` may be slow but must finish; callers bound it with a timeout and
/// treat any error as a per-frame failure.
#[async_trait]
pub trait DetectionAdapter: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;

    fn kind(&self) -> DetectorKind;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Build the adapter described by the `[detector]` config section.
pub async fn build_adapter(
    config: &DetectorConfig,
) -> Result<Arc<dyn DetectionAdapter>, DetectionError> {
    match config.kind.as_str() {
        "qr" => Ok(Arc::new(QrCodeAdapter::new())),
        "remote-text" => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                DetectionError::Unavailable("remote-text requires detector.endpoint".into())
            })?;
            let adapter = RemoteTextAdapter::connect(
                endpoint,
                config.languages.clone(),
                Duration::from_millis(config.request_timeout_ms),
            )
            .await?;
            Ok(Arc::new(adapter))
        }
        other => Err(DetectionError::Unavailable(format!(
            "unknown detector kind '{other}', expected 'qr' or 'remote-text'"
        ))),
    }
}
