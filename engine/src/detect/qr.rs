use std::sync::Arc;

use async_trait::async_trait;
use scan_resolve_common::frame::Frame;
use tokio::sync::Semaphore;
use tracing::debug;

use super::luma::to_gray;
use super::{Detection, DetectionAdapter, DetectorKind, Point};
use crate::error::DetectionError;

/// QR code detector backed by `rqrr`.
///
/// Decoding runs on the blocking pool. A single permit keeps at most one
/// decode running, including one whose caller already gave up on it.
pub struct QrCodeAdapter {
    permit: Arc<Semaphore>,
}

impl QrCodeAdapter {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
        }
    }
}

impl Default for QrCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Find and decode every QR grid in a grayscale image.
fn decode_grids(gray: &image::GrayImage) -> Vec<Detection> {
    let (width, height) = gray.dimensions();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        width as usize,
        height as usize,
        |x, y| gray.get_pixel(x as u32, y as u32).0[0],
    );

    prepared
        .detect_grids()
        .into_iter()
        .filter_map(|grid| {
            let region = grid.bounds.map(|p| Point {
                x: p.x as f32,
                y: p.y as f32,
            });
            match grid.decode() {
                Ok((_, content)) => Some(Detection::code(content, Some(region))),
                Err(e) => {
                    debug!(error = ?e, "QR grid found but not decodable");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl DetectionAdapter for QrCodeAdapter {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let permit = Arc::clone(&self.permit)
            .acquire_owned()
            .await
            .map_err(|e| DetectionError::Unavailable(e.to_string()))?;
        let frame = frame.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<Detection>, DetectionError> {
            let _permit = permit;
            let gray = to_gray(&frame)?;
            let detections = decode_grids(&gray);
            debug!(seq = frame.seq, codes = detections.len(), "QR scan complete");
            Ok(detections)
        })
        .await
        .map_err(|e| DetectionError::Backend(e.to_string()))?
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Code
    }

    fn name(&self) -> &str {
        "qr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::luma::to_encoded;
    use crate::filter::ConfidenceFilter;
    use qrcode::{Color, QrCode};

    const SCALE: u32 = 4;
    const QUIET: u32 = 4;

    /// Render `payload` as a black-on-white QR luma frame with a quiet zone.
    fn qr_frame(payload: &str, seq: u64) -> Frame {
        let code = QrCode::new(payload.as_bytes()).unwrap();
        let modules = code.width() as u32;
        let colors = code.to_colors();
        let side = (modules + 2 * QUIET) * SCALE;

        let mut data = vec![255u8; (side * side) as usize];
        for y in 0..side {
            for x in 0..side {
                let (mx, my) = (x / SCALE, y / SCALE);
                if mx < QUIET || my < QUIET || mx >= modules + QUIET || my >= modules + QUIET {
                    continue;
                }
                let idx = ((my - QUIET) * modules + (mx - QUIET)) as usize;
                if colors[idx] == Color::Dark {
                    data[(y * side + x) as usize] = 0;
                }
            }
        }
        Frame::luma(side, side, data, 0, seq).unwrap()
    }

    #[tokio::test]
    async fn decodes_code_with_corners_and_no_confidence() {
        let adapter = QrCodeAdapter::new();
        let frame = qr_frame("story1", 7);
        let side = match &frame.payload {
            scan_resolve_common::frame::FramePayload::Luma { width, .. } => *width as f32,
            _ => unreachable!(),
        };

        let detections = adapter.detect(&frame).await.unwrap();
        assert_eq!(detections.len(), 1);
        let detection = &detections[0];
        assert_eq!(detection.decoded_value, "story1");
        assert_eq!(detection.confidence, None);

        let region = detection.region.expect("decoded grid has corners");
        for corner in region {
            assert!(corner.x >= 0.0 && corner.x <= side, "corner {corner:?} outside frame");
            assert!(corner.y >= 0.0 && corner.y <= side, "corner {corner:?} outside frame");
        }
        let xs: Vec<f32> = region.iter().map(|p| p.x).collect();
        let ys: Vec<f32> = region.iter().map(|p| p.y).collect();
        let span = |v: &[f32]| {
            v.iter().cloned().fold(f32::MIN, f32::max) - v.iter().cloned().fold(f32::MAX, f32::min)
        };
        assert!(span(&xs) > side / 2.0 && span(&ys) > side / 2.0);

        let kept = ConfidenceFilter::new(1.0).filter(detections);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].decoded_value, "story1");
    }

    #[tokio::test]
    async fn decodes_url_from_encoded_frame() {
        let adapter = QrCodeAdapter::new();
        let url = "https://library.example/read?story=story2";
        let png = to_encoded(&qr_frame(url, 0)).unwrap();
        let frame = Frame::encoded(png, 0, 1);

        let detections = adapter.detect(&frame).await.unwrap();
        let values: Vec<&str> = detections.iter().map(|d| d.decoded_value.as_str()).collect();
        assert_eq!(values, vec![url]);
    }

    #[tokio::test]
    async fn blank_frame_has_no_codes() {
        let adapter = QrCodeAdapter::new();
        let frame = Frame::luma(64, 64, vec![255u8; 64 * 64], 0, 0).unwrap();
        assert!(adapter.detect(&frame).await.unwrap().is_empty());
        assert_eq!(adapter.kind(), DetectorKind::Code);
    }

    #[tokio::test]
    async fn malformed_image_is_a_frame_failure() {
        let adapter = QrCodeAdapter::new();
        let frame = Frame::encoded(vec![0xFFu8, 0xD8, 0x00], 0, 3);
        assert!(matches!(
            adapter.detect(&frame).await,
            Err(DetectionError::Decode(_))
        ));
        // The permit is released after a failure.
        let blank = Frame::luma(8, 8, vec![0u8; 64], 0, 4).unwrap();
        assert!(adapter.detect(&blank).await.is_ok());
    }
}
