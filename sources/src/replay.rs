use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use scan_resolve_common::frame::Frame;
use scan_resolve_common::source::{FrameSource, SourceError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Frames read back from a replay log written by [`ReplayWriter`].
///
/// Frames come out in file order with their recorded sequence numbers, so a
/// replayed session makes the same sampling decisions every time.
pub struct ReplaySource {
    path: PathBuf,
    data: Bytes,
    offset: usize,
    /// Sleep between frames according to their capture timestamps.
    realtime: bool,
    last_captured_ms: Option<i64>,
    frames: u64,
    closed: bool,
}

impl ReplaySource {
    pub async fn open(path: &Path, realtime: bool) -> Result<Self, SourceError> {
        let data = tokio::fs::read(path).await?;
        info!(path = %path.display(), bytes = data.len(), realtime, "opened replay log");
        Ok(Self {
            path: path.to_path_buf(),
            data: Bytes::from(data),
            offset: 0,
            realtime,
            last_captured_ms: None,
            frames: 0,
            closed: false,
        })
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn next(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }

        let Some((frame, used)) = Frame::decode_bytes(&self.data.slice(self.offset..))? else {
            let trailing = self.data.len() - self.offset;
            if trailing > 0 {
                warn!(path = %self.path.display(), trailing, "replay log ends with a partial record");
            }
            debug!(frames = self.frames, "replay log exhausted");
            return Ok(None);
        };
        self.offset += used;
        self.frames += 1;

        if self.realtime {
            if let Some(prev) = self.last_captured_ms {
                let gap = frame.captured_at_ms.saturating_sub(prev);
                if gap > 0 {
                    tokio::time::sleep(Duration::from_millis(gap as u64)).await;
                }
            }
            self.last_captured_ms = Some(frame.captured_at_ms);
        }

        Ok(Some(frame))
    }

    async fn close(&mut self) {
        self.closed = true;
    }

    fn name(&self) -> &str {
        "replay"
    }
}

/// Appends frames to a replay log.
pub struct ReplayWriter {
    file: BufWriter<tokio::fs::File>,
    buf: BytesMut,
    frames: u64,
}

impl ReplayWriter {
    pub async fn create(path: &Path) -> Result<Self, SourceError> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self {
            file: BufWriter::new(file),
            buf: BytesMut::new(),
            frames: 0,
        })
    }

    pub async fn append(&mut self, frame: &Frame) -> Result<(), SourceError> {
        self.buf.clear();
        frame.encode(&mut self.buf);
        self.file.write_all(&self.buf).await?;
        self.frames += 1;
        Ok(())
    }

    /// Flush and return the number of frames written.
    pub async fn finish(mut self) -> Result<u64, SourceError> {
        self.file.flush().await?;
        Ok(self.frames)
    }
}
