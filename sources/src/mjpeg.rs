use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use scan_resolve_common::frame::Frame;
use scan_resolve_common::source::{FrameSource, SourceError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting image bytes until the next boundary.
    CollectingImage,
}

/// Incremental splitter for `multipart/x-mixed-replace` camera streams.
///
/// Chunks are pushed as they arrive from the network; complete image parts
/// are pulled out with [`MultipartParser::next_part`]. A part is complete once
/// the following boundary has been seen.
pub struct MultipartParser {
    buffer: BytesMut,
    state: ParseState,
    /// Offset into `buffer` already scanned for the closing boundary.
    scan_from: usize,
}

impl MultipartParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Drop any partial part, e.g. after the connection was re-established.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ParseState::SeekingBoundary;
        self.scan_from = 0;
    }

    pub fn next_part(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.scan_from = 0;
                    self.state = ParseState::CollectingImage;
                }
                ParseState::CollectingImage => {
                    let Some(pos) = find_subsequence(&self.buffer[self.scan_from..], BOUNDARY)
                    else {
                        self.scan_from = self.buffer.len().saturating_sub(BOUNDARY.len());
                        return None;
                    };
                    let part_end = self.scan_from + pos;
                    // Strip trailing \r\n before boundary
                    let end = if part_end >= 2
                        && self.buffer[part_end - 2] == b'\r'
                        && self.buffer[part_end - 1] == b'\n'
                    {
                        part_end - 2
                    } else {
                        part_end
                    };

                    let part = self.buffer.split_to(end).freeze();
                    let _ = self.buffer.split_to(part_end - end + BOUNDARY.len());
                    self.state = ParseState::SeekingHeaderEnd;

                    if !part.is_empty() {
                        return Some(part);
                    }
                }
            }
        }
    }
}

impl Default for MultipartParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames from a camera's MJPEG endpoint.
///
/// Connects lazily on the first `next`. A dropped connection is re-established
/// with exponential backoff; once `max_reconnects` consecutive attempts fail
/// the error is surfaced and the scanning session ends.
pub struct MjpegSource {
    url: String,
    client: reqwest::Client,
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    parser: MultipartParser,
    seq: u64,
    max_reconnects: u32,
    reconnects: u32,
    closed: bool,
}

impl MjpegSource {
    pub fn new(
        url: &str,
        connect_timeout: Duration,
        max_reconnects: u32,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| SourceError::Connect(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            client,
            stream: None,
            parser: MultipartParser::new(),
            seq: 0,
            max_reconnects,
            reconnects: 0,
            closed: false,
        })
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        info!(url = %self.url, "connecting to MJPEG stream");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        info!(status = %response.status(), "connected to MJPEG stream");
        self.parser.reset();
        self.stream = Some(response.bytes_stream().boxed());
        Ok(())
    }

    /// Sleep before the next reconnect, or give up with `err`.
    async fn backoff_or_fail(
        &mut self,
        err: SourceError,
        backoff: &mut Duration,
    ) -> Result<(), SourceError> {
        self.stream = None;
        if self.reconnects >= self.max_reconnects {
            error!(error = %err, attempts = self.reconnects, "MJPEG stream unavailable, giving up");
            return Err(err);
        }
        self.reconnects += 1;
        warn!(
            error = %err,
            attempt = self.reconnects,
            "MJPEG stream error, reconnecting in {:?}",
            backoff
        );
        tokio::time::sleep(*backoff).await;
        *backoff = (*backoff * 2).min(MAX_BACKOFF);
        Ok(())
    }
}

#[async_trait]
impl FrameSource for MjpegSource {
    async fn next(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if let Some(part) = self.parser.next_part() {
                let seq = self.seq;
                self.seq += 1;
                self.reconnects = 0;
                debug!(seq, bytes = part.len(), "MJPEG frame received");
                return Ok(Some(Frame::captured_now(part, seq)));
            }

            let Some(stream) = self.stream.as_mut() else {
                if let Err(e) = self.connect().await {
                    self.backoff_or_fail(e, &mut backoff).await?;
                }
                continue;
            };

            match stream.next().await {
                Some(Ok(chunk)) => self.parser.push(&chunk),
                Some(Err(e)) => {
                    self.backoff_or_fail(SourceError::Stream(e.to_string()), &mut backoff)
                        .await?;
                }
                None => {
                    if self.reconnects >= self.max_reconnects {
                        info!(url = %self.url, "MJPEG stream ended");
                        self.stream = None;
                        return Ok(None);
                    }
                    info!("MJPEG stream ended cleanly, reconnecting");
                    self.backoff_or_fail(SourceError::Stream("stream ended".into()), &mut backoff)
                        .await?;
                }
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            info!(url = %self.url, frames = self.seq, "closing MJPEG stream");
        }
        self.stream = None;
        self.closed = true;
    }

    fn name(&self) -> &str {
        "mjpeg"
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(body: &[u8]) -> Vec<u8> {
        let mut out = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn part_completes_on_next_boundary() {
        let mut parser = MultipartParser::new();
        parser.push(&part(b"\xFF\xD8first\xFF\xD9"));
        assert!(parser.next_part().is_none());

        parser.push(&part(b"second"));
        assert_eq!(parser.next_part().unwrap().as_ref(), b"\xFF\xD8first\xFF\xD9");
        assert!(parser.next_part().is_none());
    }

    #[test]
    fn boundary_split_across_chunks() {
        let mut stream = part(b"one");
        stream.extend(part(b"two"));
        stream.extend(part(b"three"));

        let mut parser = MultipartParser::new();
        let mut parts = Vec::new();
        for chunk in stream.chunks(5) {
            parser.push(chunk);
            while let Some(p) = parser.next_part() {
                parts.push(p);
            }
        }
        assert_eq!(parts, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut parser = MultipartParser::new();
        parser.push(b"HTTP preamble noise\r\n");
        parser.push(&part(b"img"));
        parser.push(b"--frame\r\n");
        assert_eq!(parser.next_part().unwrap().as_ref(), b"img");
    }

    #[test]
    fn reset_discards_partial_part() {
        let mut parser = MultipartParser::new();
        parser.push(b"--frame\r\n\r\nhalf an ima");
        parser.reset();
        parser.push(&part(b"fresh"));
        parser.push(b"--frame\r\n");
        assert_eq!(parser.next_part().unwrap().as_ref(), b"fresh");
    }
}
