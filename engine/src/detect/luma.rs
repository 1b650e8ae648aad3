use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat};
use scan_resolve_common::frame::{Frame, FramePayload};

use crate::error::DetectionError;

/// Decode a frame into an 8-bit grayscale image.
pub fn to_gray(frame: &Frame) -> Result<GrayImage, DetectionError> {
    match &frame.payload {
        FramePayload::Encoded(data) => {
            let img = image::load_from_memory(data)
                .map_err(|e| DetectionError::Decode(e.to_string()))?;
            Ok(img.to_luma8())
        }
        FramePayload::Luma {
            width,
            height,
            data,
        } => GrayImage::from_raw(*width, *height, data.to_vec()).ok_or_else(|| {
            DetectionError::Decode(format!("luma plane does not match {width}x{height}"))
        }),
    }
}

/// Compressed image bytes for detectors that take a file upload. Encoded
/// frames pass through untouched; raw luma planes are wrapped as PNG.
pub fn to_encoded(frame: &Frame) -> Result<Vec<u8>, DetectionError> {
    match &frame.payload {
        FramePayload::Encoded(data) => Ok(data.to_vec()),
        FramePayload::Luma { .. } => {
            let gray = to_gray(frame)?;
            let mut out = Cursor::new(Vec::new());
            DynamicImage::ImageLuma8(gray)
                .write_to(&mut out, ImageFormat::Png)
                .map_err(|e| DetectionError::Decode(e.to_string()))?;
            Ok(out.into_inner())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_frame_to_gray() {
        let frame = Frame::luma(3, 2, vec![0u8, 10, 20, 30, 40, 50], 0, 0).unwrap();
        let gray = to_gray(&frame).unwrap();
        assert_eq!(gray.dimensions(), (3, 2));
        assert_eq!(gray.get_pixel(2, 1).0[0], 50);
    }

    #[test]
    fn luma_frame_wraps_as_png() {
        let frame = Frame::luma(4, 4, vec![128u8; 16], 0, 0).unwrap();
        let png = to_encoded(&frame).unwrap();
        let reencoded = Frame::encoded(png, 0, 1);
        assert_eq!(to_gray(&reencoded).unwrap().dimensions(), (4, 4));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let frame = Frame::encoded(vec![0x00u8, 0x01, 0x02], 0, 0);
        assert!(matches!(to_gray(&frame), Err(DetectionError::Decode(_))));
    }
}
