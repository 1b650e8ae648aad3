//! Per-frame decisions between detection and resolution.

pub mod change;
pub mod confidence;

pub use change::ChangeDetector;
pub use confidence::ConfidenceFilter;
