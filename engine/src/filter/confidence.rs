use crate::detect::Detection;

/// Drops detections whose confidence is below the threshold.
///
/// Detections without a confidence (decoded codes) always pass. A confidence
/// exactly at the threshold passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceFilter {
    threshold: f32,
}

impl ConfidenceFilter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn passes(&self, detection: &Detection) -> bool {
        detection
            .confidence
            .map_or(true, |confidence| confidence >= self.threshold)
    }

    /// The detections that pass, in their original order.
    pub fn filter(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.passes(d)).collect()
    }

    /// Split into `(kept, dropped)`, both in original order.
    pub fn partition(&self, detections: Vec<Detection>) -> (Vec<Detection>, Vec<Detection>) {
        detections.into_iter().partition(|d| self.passes(d))
    }
}
