use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use scan_resolve_common::frame::Frame;

use super::{Detection, DetectionAdapter, DetectorKind};
use crate::error::DetectionError;

/// Deterministic detector driven by frame sequence numbers.
///
/// Frames without a script entry yield no detections. Used for demos over
/// recorded streams and for exercising the pipeline without a camera.
pub struct ScriptedAdapter {
    kind: DetectorKind,
    script: HashMap<u64, Vec<Detection>>,
    failing: HashSet<u64>,
    latency: Option<Duration>,
    calls: AtomicU64,
}

impl ScriptedAdapter {
    pub fn new(kind: DetectorKind) -> Self {
        Self {
            kind,
            script: HashMap::new(),
            failing: HashSet::new(),
            latency: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Detections reported for the frame with sequence number `seq`.
    pub fn with_frame(mut self, seq: u64, detections: Vec<Detection>) -> Self {
        self.script.insert(seq, detections);
        self
    }

    /// Report `detection` for every frame in `seqs`.
    pub fn with_frames(mut self, seqs: impl IntoIterator<Item = u64>, detection: Detection) -> Self {
        for seq in seqs {
            self.script.insert(seq, vec![detection.clone()]);
        }
        self
    }

    /// Sleep this long before answering, to simulate a slow backend.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail detection on these frames.
    pub fn failing_on(mut self, seqs: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(seqs);
        self
    }

    /// Number of `detect` calls made so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DetectionAdapter for ScriptedAdapter {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.contains(&frame.seq) {
            return Err(DetectionError::Backend(format!(
                "scripted failure on frame {}",
                frame.seq
            )));
        }
        Ok(self.script.get(&frame.seq).cloned().unwrap_or_default())
    }

    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
