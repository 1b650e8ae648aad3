use std::sync::Arc;
use std::time::Duration;

use scan_resolve_common::frame::Frame;
use tracing::{debug, warn};

use crate::detect::{Detection, DetectionAdapter};
use crate::error::DetectionError;
use crate::events::Diagnostic;
use crate::filter::{ChangeDetector, ConfidenceFilter};
use crate::machine::Outcome;
use crate::resolver::{ContentResolver, Resolution};

/// What one sampled frame produced.
#[derive(Debug)]
pub struct FrameReport {
    pub outcome: Outcome,
    pub diagnostics: Vec<Diagnostic>,
    /// Whether the resolver was consulted.
    pub resolved: bool,
}

impl FrameReport {
    fn unchanged(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            outcome: Outcome::NoChange,
            diagnostics,
            resolved: false,
        }
    }

    pub fn detection_failed(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_detection_failure)
    }
}

/// detect → filter → change detection → resolve, for one session.
///
/// Reads nothing but its arguments and changes nothing; the caller commits
/// the returned outcome to the state machine.
pub struct ScanPipeline {
    adapter: Arc<dyn DetectionAdapter>,
    resolver: Arc<ContentResolver>,
    filter: ConfidenceFilter,
    change: ChangeDetector,
    detection_timeout: Duration,
}

impl ScanPipeline {
    pub fn new(
        adapter: Arc<dyn DetectionAdapter>,
        resolver: Arc<ContentResolver>,
        confidence_threshold: f32,
        detection_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            resolver,
            filter: ConfidenceFilter::new(confidence_threshold),
            change: ChangeDetector::new(),
            detection_timeout,
        }
    }

    pub async fn process_frame(&self, frame: &Frame, last_accepted: Option<&str>) -> FrameReport {
        let mut diagnostics = Vec::new();

        let detections = match self.detect(frame).await {
            Ok(detections) => detections,
            Err(DetectionError::Timeout(timeout)) => {
                warn!(seq = frame.seq, ?timeout, "detection timed out");
                diagnostics.push(Diagnostic::DetectionTimedOut {
                    seq: frame.seq,
                    timeout_ms: timeout.as_millis() as u64,
                });
                return FrameReport::unchanged(diagnostics);
            }
            Err(e) => {
                warn!(seq = frame.seq, error = %e, "detection failed");
                diagnostics.push(Diagnostic::DetectionFailed {
                    seq: frame.seq,
                    error: e.to_string(),
                });
                return FrameReport::unchanged(diagnostics);
            }
        };

        let (kept, dropped) = self.filter.partition(detections);
        if !dropped.is_empty() {
            debug!(
                seq = frame.seq,
                dropped = dropped.len(),
                threshold = self.filter.threshold(),
                "detections below threshold"
            );
            diagnostics.push(Diagnostic::BelowThreshold {
                seq: frame.seq,
                values: dropped.into_iter().map(|d| d.decoded_value).collect(),
                threshold: self.filter.threshold(),
            });
        }

        let Some(candidate) = self.change.select(&kept, last_accepted) else {
            return FrameReport::unchanged(diagnostics);
        };
        let value = candidate.decoded_value.clone();

        let resolver = Arc::clone(&self.resolver);
        let lookup_value = value.clone();
        let resolution =
            tokio::task::spawn_blocking(move || resolver.resolve(&lookup_value)).await;

        let outcome = match resolution {
            Ok(Ok(Resolution::Found(record))) => Outcome::Resolved { value, record },
            Ok(Ok(Resolution::NotFound)) => {
                diagnostics.push(Diagnostic::ResolutionMiss {
                    seq: frame.seq,
                    decoded_value: value.clone(),
                });
                Outcome::Miss { value }
            }
            Ok(Err(e)) => {
                warn!(seq = frame.seq, value, error = %e, "content lookup failed");
                diagnostics.push(Diagnostic::StoreFailed {
                    seq: frame.seq,
                    decoded_value: value,
                    error: e.to_string(),
                });
                Outcome::NoChange
            }
            Err(e) => {
                warn!(seq = frame.seq, value, error = %e, "content lookup task failed");
                diagnostics.push(Diagnostic::StoreFailed {
                    seq: frame.seq,
                    decoded_value: value,
                    error: e.to_string(),
                });
                Outcome::NoChange
            }
        };

        FrameReport {
            outcome,
            diagnostics,
            resolved: true,
        }
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        match tokio::time::timeout(self.detection_timeout, self.adapter.detect(frame)).await {
            Ok(result) => {
                let detections = result?;
                debug!(
                    seq = frame.seq,
                    detector = self.adapter.name(),
                    count = detections.len(),
                    "detections"
                );
                Ok(detections)
            }
            Err(_) => Err(DetectionError::Timeout(self.detection_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorKind, ScriptedAdapter};
    use crate::error::StoreError;
    use crate::resolver::{ContentRecord, ContentStore, KeyExtraction};
    use std::collections::BTreeMap;

    struct OneRecord;

    impl ContentStore for OneRecord {
        fn lookup(&self, id: &str) -> Result<Option<Arc<ContentRecord>>, StoreError> {
            match id {
                "story1" => Ok(Some(Arc::new(ContentRecord {
                    id: id.into(),
                    title: "The Little Red Hen".into(),
                    body: String::new(),
                    attributes: BTreeMap::new(),
                }))),
                "broken" => Err(StoreError::Poisoned),
                _ => Ok(None),
            }
        }
    }

    fn pipeline(adapter: ScriptedAdapter, threshold: f32) -> ScanPipeline {
        let resolver = ContentResolver::new(Arc::new(OneRecord), KeyExtraction::Direct);
        ScanPipeline::new(
            Arc::new(adapter),
            Arc::new(resolver),
            threshold,
            Duration::from_secs(1),
        )
    }

    fn frame(seq: u64) -> Frame {
        Frame::encoded(vec![0u8], 0, seq)
    }

    #[tokio::test]
    async fn resolves_first_new_value() {
        let adapter = ScriptedAdapter::new(DetectorKind::Text).with_frame(
            1,
            vec![
                Detection::text("old", 0.9),
                Detection::text("story1", 0.9),
                Detection::text("other", 0.9),
            ],
        );
        let report = pipeline(adapter, 0.5).process_frame(&frame(1), Some("old")).await;
        match report.outcome {
            Outcome::Resolved { value, record } => {
                assert_eq!(value, "story1");
                assert_eq!(record.title, "The Little Red Hen");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(report.resolved);
        assert!(report.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn low_confidence_never_reaches_the_resolver() {
        let adapter = ScriptedAdapter::new(DetectorKind::Text)
            .with_frame(1, vec![Detection::text("story1", 0.1)]);
        let report = pipeline(adapter, 0.5).process_frame(&frame(1), None).await;
        assert!(matches!(report.outcome, Outcome::NoChange));
        assert!(!report.resolved);
        assert!(matches!(
            report.diagnostics.as_slice(),
            [Diagnostic::BelowThreshold { seq: 1, .. }]
        ));
    }

    #[tokio::test]
    async fn unknown_value_is_a_miss() {
        let adapter = ScriptedAdapter::new(DetectorKind::Code)
            .with_frame(2, vec![Detection::code("nope", None)]);
        let report = pipeline(adapter, 0.5).process_frame(&frame(2), None).await;
        assert!(matches!(report.outcome, Outcome::Miss { ref value } if value == "nope"));
        assert!(matches!(
            report.diagnostics.as_slice(),
            [Diagnostic::ResolutionMiss { seq: 2, .. }]
        ));
    }

    #[tokio::test]
    async fn store_failure_is_absorbed() {
        let adapter = ScriptedAdapter::new(DetectorKind::Code)
            .with_frame(2, vec![Detection::code("broken", None)]);
        let report = pipeline(adapter, 0.5).process_frame(&frame(2), None).await;
        assert!(matches!(report.outcome, Outcome::NoChange));
        assert!(matches!(
            report.diagnostics.as_slice(),
            [Diagnostic::StoreFailed { .. }]
        ));
    }

    #[tokio::test]
    async fn detector_failure_is_a_diagnostic() {
        let adapter = ScriptedAdapter::new(DetectorKind::Text).failing_on([4]);
        let report = pipeline(adapter, 0.5).process_frame(&frame(4), None).await;
        assert!(matches!(report.outcome, Outcome::NoChange));
        assert!(report.detection_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_detection_times_out() {
        let adapter = ScriptedAdapter::new(DetectorKind::Text)
            .with_frame(1, vec![Detection::text("story1", 0.9)])
            .with_latency(Duration::from_secs(5));
        let report = pipeline(adapter, 0.5).process_frame(&frame(1), None).await;
        assert!(matches!(report.outcome, Outcome::NoChange));
        assert!(matches!(
            report.diagnostics.as_slice(),
            [Diagnostic::DetectionTimedOut { seq: 1, timeout_ms: 1000 }]
        ));
    }
}
