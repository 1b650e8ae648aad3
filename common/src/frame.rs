use bytes::{BufMut, Bytes, BytesMut};
use std::ops::Range;

/// Image data carried inside a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// A compressed still (JPEG/PNG) as delivered by a camera endpoint.
    Encoded(Bytes),
    /// Raw 8-bit luminance plane, row-major, `width * height` bytes.
    Luma { width: u32, height: u32, data: Bytes },
}

/// One still image sampled from a continuous camera stream.
///
/// Frames are immutable once built and cheap to clone (the buffer is
/// reference-counted), so a frame can be handed from the source task to the
/// detection task without copying pixels.
///
/// Replay-log record formats (big-endian):
///
/// encoded:
///   [0]       marker = 0x01
///   [1..9]    captured_at_ms  (i64)
///   [9..17]   seq             (u64)
///   [17..21]  len             (u32)
///   [21..]    encoded image bytes
///
/// luma:
///   [0]       marker = 0x02
///   [1..9]    captured_at_ms  (i64)
///   [9..17]   seq             (u64)
///   [17..21]  width           (u32)
///   [21..25]  height          (u32)
///   [25..29]  len             (u32, == width * height)
///   [29..]    luminance bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub payload: FramePayload,
    pub captured_at_ms: i64,
    pub seq: u64,
}

const ENCODED_MARKER: u8 = 0x01;
const LUMA_MARKER: u8 = 0x02;
const ENCODED_HEADER_SIZE: usize = 21;
const LUMA_HEADER_SIZE: usize = 29;

impl Frame {
    pub fn encoded(data: impl Into<Bytes>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: FramePayload::Encoded(data.into()),
            captured_at_ms,
            seq,
        }
    }

    pub fn luma(
        width: u32,
        height: u32,
        data: impl Into<Bytes>,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let data = data.into();
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::Dimensions {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            payload: FramePayload::Luma {
                width,
                height,
                data,
            },
            captured_at_ms,
            seq,
        })
    }

    /// Stamp a frame with the current wall-clock time.
    pub fn captured_now(data: impl Into<Bytes>, seq: u64) -> Self {
        Self::encoded(data, chrono::Utc::now().timestamp_millis(), seq)
    }

    pub fn payload_size(&self) -> usize {
        match &self.payload {
            FramePayload::Encoded(data) => data.len(),
            FramePayload::Luma { data, .. } => data.len(),
        }
    }

    // -- Replay log codec ---------------------------------------------------------

    /// Append this frame as one replay-log record.
    pub fn encode(&self, buf: &mut BytesMut) {
        match &self.payload {
            FramePayload::Encoded(data) => {
                buf.reserve(ENCODED_HEADER_SIZE + data.len());
                buf.put_u8(ENCODED_MARKER);
                buf.put_i64(self.captured_at_ms);
                buf.put_u64(self.seq);
                buf.put_u32(data.len() as u32);
                buf.put_slice(data);
            }
            FramePayload::Luma {
                width,
                height,
                data,
            } => {
                buf.reserve(LUMA_HEADER_SIZE + data.len());
                buf.put_u8(LUMA_MARKER);
                buf.put_i64(self.captured_at_ms);
                buf.put_u64(self.seq);
                buf.put_u32(*width);
                buf.put_u32(*height);
                buf.put_u32(data.len() as u32);
                buf.put_slice(data);
            }
        }
    }

    /// Decode one record from the front of `data`.
    ///
    /// Returns `Ok(None)` when `data` holds only part of a record, otherwise
    /// the frame and the number of bytes it occupied.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>, FrameError> {
        Self::decode_record(data, |body| Bytes::copy_from_slice(&data[body]))
    }

    /// Like [`Frame::decode`], but the payload is a slice of `data` rather
    /// than a copy.
    pub fn decode_bytes(data: &Bytes) -> Result<Option<(Self, usize)>, FrameError> {
        Self::decode_record(data, |body| data.slice(body))
    }

    fn decode_record(
        data: &[u8],
        payload: impl FnOnce(Range<usize>) -> Bytes,
    ) -> Result<Option<(Self, usize)>, FrameError> {
        let Some(&marker) = data.first() else {
            return Ok(None);
        };

        let header_size = match marker {
            ENCODED_MARKER => ENCODED_HEADER_SIZE,
            LUMA_MARKER => LUMA_HEADER_SIZE,
            other => return Err(FrameError::UnknownMarker(other)),
        };
        if data.len() < header_size {
            return Ok(None);
        }

        let captured_at_ms = i64::from_be_bytes(read_array(data, 1));
        let seq = u64::from_be_bytes(read_array(data, 9));
        let len = u32::from_be_bytes(read_array(data, header_size - 4)) as usize;
        let total = header_size + len;
        if data.len() < total {
            return Ok(None);
        }
        let body = payload(header_size..total);

        let frame = if marker == ENCODED_MARKER {
            Self::encoded(body, captured_at_ms, seq)
        } else {
            let width = u32::from_be_bytes(read_array(data, 17));
            let height = u32::from_be_bytes(read_array(data, 21));
            Self::luma(width, height, body, captured_at_ms, seq)?
        };
        Ok(Some((frame, total)))
    }
}

fn read_array<const N: usize>(data: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[at..at + N]);
    out
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unknown frame record marker 0x{0:02x}")]
    UnknownMarker(u8),
    #[error("luma plane of {len} bytes does not match {width}x{height}")]
    Dimensions { width: u32, height: u32, len: usize },
}
