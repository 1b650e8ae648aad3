use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use scan_resolve_common::frame::Frame;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::luma::to_encoded;
use super::{Detection, DetectionAdapter, DetectorKind, Point};
use crate::error::DetectionError;

/// Text recognition served by an external OCR service.
///
/// Protocol:
///   GET  {endpoint}/health  -> 2xx once the model is loaded
///   POST {endpoint}/ocr     {"image": base64, "languages": [..]}
///                           -> {"detections": [{"text", "confidence", "bbox"}]}
///
/// `connect` performs the warm-up request, so a constructed adapter is ready
/// for per-frame use and keeps its connection pool for its whole lifetime.
pub struct RemoteTextAdapter {
    client: reqwest::Client,
    ocr_url: String,
    languages: Vec<String>,
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    image: String,
    languages: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    detections: Vec<OcrItem>,
}

#[derive(Debug, Deserialize)]
struct OcrItem {
    text: String,
    confidence: f32,
    #[serde(default)]
    bbox: Option<Vec<[f32; 2]>>,
}

impl OcrItem {
    fn into_detection(self) -> Detection {
        let region = self.bbox.and_then(|points| {
            let corners: [[f32; 2]; 4] = points.try_into().ok()?;
            Some(corners.map(|[x, y]| Point { x, y }))
        });
        Detection {
            decoded_value: self.text,
            region,
            confidence: Some(self.confidence.clamp(0.0, 1.0)),
        }
    }
}

impl RemoteTextAdapter {
    pub async fn connect(
        endpoint: &str,
        languages: Vec<String>,
        request_timeout: Duration,
    ) -> Result<Self, DetectionError> {
        let base = url::Url::parse(endpoint)
            .map_err(|e| DetectionError::Unavailable(format!("bad OCR endpoint {endpoint}: {e}")))?;
        let base = base.as_str().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DetectionError::Unavailable(e.to_string()))?;

        let health_url = format!("{base}/health");
        let response = client
            .get(&health_url)
            .send()
            .await
            .map_err(|e| DetectionError::Unavailable(format!("OCR warm-up failed: {e}")))?;
        if !response.status().is_success() {
            return Err(DetectionError::Unavailable(format!(
                "OCR warm-up returned HTTP {}",
                response.status().as_u16()
            )));
        }

        info!(endpoint = %base, ?languages, "remote OCR detector ready");
        Ok(Self {
            client,
            ocr_url: format!("{base}/ocr"),
            languages,
        })
    }
}

#[async_trait]
impl DetectionAdapter for RemoteTextAdapter {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let image = base64::engine::general_purpose::STANDARD.encode(to_encoded(frame)?);
        let body = OcrRequest {
            image,
            languages: &self.languages,
        };

        let response = self
            .client
            .post(&self.ocr_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectionError::Backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DetectionError::Backend(format!(
                "OCR service returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::Backend(format!("bad OCR response: {e}")))?;
        debug!(seq = frame.seq, lines = parsed.detections.len(), "OCR complete");
        Ok(parsed
            .detections
            .into_iter()
            .map(OcrItem::into_detection)
            .collect())
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Text
    }

    fn name(&self) -> &str {
        "remote-text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer each incoming HTTP request with the next canned (status, body).
    async fn stub_server(replies: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    if n == 0 || request_complete(&request) {
                        break;
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        format!("http://{addr}")
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    #[tokio::test]
    async fn warm_up_then_detect() {
        let endpoint = stub_server(vec![
            (200, "{}"),
            (
                200,
                r#"{"detections":[
                    {"text":"story1","confidence":0.91,"bbox":[[0,0],[10,0],[10,5],[0,5]]},
                    {"text":"noise","confidence":0.05}
                ]}"#,
            ),
        ])
        .await;

        let adapter = RemoteTextAdapter::connect(&endpoint, vec!["en".into()], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(adapter.kind(), DetectorKind::Text);

        let frame = Frame::luma(4, 4, vec![200u8; 16], 0, 0).unwrap();
        let detections = adapter.detect(&frame).await.unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].decoded_value, "story1");
        assert_eq!(detections[0].confidence, Some(0.91));
        assert_eq!(detections[0].region.unwrap()[2], Point { x: 10.0, y: 5.0 });
        assert!(detections[1].region.is_none());
    }

    #[tokio::test]
    async fn failed_warm_up_is_unavailable() {
        let endpoint = stub_server(vec![(503, "{}")]).await;
        let result = RemoteTextAdapter::connect(&endpoint, vec![], Duration::from_secs(5)).await;
        assert!(matches!(result, Err(DetectionError::Unavailable(_))));
    }

    #[tokio::test]
    async fn service_error_is_a_frame_failure() {
        let endpoint = stub_server(vec![(200, "{}"), (500, "{}")]).await;
        let adapter = RemoteTextAdapter::connect(&endpoint, vec![], Duration::from_secs(5))
            .await
            .unwrap();
        let frame = Frame::luma(2, 2, vec![0u8; 4], 0, 9).unwrap();
        assert!(matches!(
            adapter.detect(&frame).await,
            Err(DetectionError::Backend(_))
        ));
    }

    #[test]
    fn bbox_needs_four_corners() {
        let item = OcrItem {
            text: "x".into(),
            confidence: 1.4,
            bbox: Some(vec![[0.0, 0.0], [1.0, 1.0]]),
        };
        let detection = item.into_detection();
        assert!(detection.region.is_none());
        assert_eq!(detection.confidence, Some(1.0));
    }
}
