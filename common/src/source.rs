use async_trait::async_trait;

use crate::frame::{Frame, FrameError};

/// An ordered, unbounded supply of camera frames.
///
/// `next` yields frames in acquisition order. `Ok(None)` means the source has
/// ended; an error means it is unusable. Either way the scanning session that
/// owns the source is over.
#[async_trait]
pub trait FrameSource: Send {
    async fn next(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Release the underlying device or connection. Safe to call repeatedly.
    async fn close(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Creates a fresh [`FrameSource`] for every scanning session.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FrameSource>, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("camera connection failed: {0}")]
    Connect(String),
    #[error("camera returned HTTP status {0}")]
    Status(u16),
    #[error("camera stream error: {0}")]
    Stream(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt frame record: {0}")]
    Frame(#[from] FrameError),
    #[error("source misconfigured: {0}")]
    Config(String),
    #[error("source is closed")]
    Closed,
}
