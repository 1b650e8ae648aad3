//! Scan-and-resolve engine.
//!
//! Camera frames are sampled at a fixed cadence, run through a detector,
//! filtered by confidence, deduplicated against the last accepted value and
//! resolved to a content record that a display layer can show.
//!
//! ```text
//! FrameSource → FrameSampler → DetectionAdapter → ConfidenceFilter
//!             → ChangeDetector → ContentResolver → ScanMachine → events
//! ```

pub mod control;
pub mod detect;
pub mod error;
pub mod events;
pub mod filter;
pub mod machine;
pub mod pipeline;
pub mod resolver;
pub mod sampler;

pub use control::{EngineOptions, ScanEngine};
pub use detect::{build_adapter, Detection, DetectionAdapter, DetectorKind, Point};
pub use error::{DetectionError, EngineError, StoreError};
pub use events::{Diagnostic, Notice, ScanEvent, StopReason};
pub use filter::{ChangeDetector, ConfidenceFilter};
pub use machine::{Outcome, ScanMachine, ScanSnapshot, ScanState, SessionCounters};
pub use pipeline::{FrameReport, ScanPipeline};
pub use resolver::{
    key_extraction, open_store, ContentRecord, ContentResolver, ContentStore, KeyExtraction,
    Resolution,
};
pub use sampler::FrameSampler;
