//! What the display layer sees: transitions, advisory diagnostics and the
//! user-facing notice.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::machine::ScanState;
use crate::resolver::ContentRecord;

/// Broadcast to subscribers. Transitions carry the full display tuple so a
/// subscriber never has to combine an event with a separate snapshot read.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Transition {
        state: ScanState,
        decoded_value: Option<String>,
        record: Option<Arc<ContentRecord>>,
    },
    Diagnostic(Diagnostic),
}

/// Per-frame conditions. Advisory only; never change engine state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    BelowThreshold {
        seq: u64,
        values: Vec<String>,
        threshold: f32,
    },
    ResolutionMiss {
        seq: u64,
        decoded_value: String,
    },
    DetectionFailed {
        seq: u64,
        error: String,
    },
    DetectionTimedOut {
        seq: u64,
        timeout_ms: u64,
    },
    StoreFailed {
        seq: u64,
        decoded_value: String,
        error: String,
    },
}

impl Diagnostic {
    pub fn is_detection_failure(&self) -> bool {
        matches!(
            self,
            Diagnostic::DetectionFailed { .. } | Diagnostic::DetectionTimedOut { .. }
        )
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    SourceEnded,
    SourceFailed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("stopped by request"),
            StopReason::SourceEnded => f.write_str("camera stream ended"),
            StopReason::SourceFailed(err) => write!(f, "camera unavailable: {err}"),
        }
    }
}

/// The one message a display should show for the current state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    NothingScanned,
    Scanning,
    Unrecognized { decoded_value: String },
    Showing { title: String },
    Stopped { reason: StopReason },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NothingScanned => f.write_str("Nothing scanned yet"),
            Notice::Scanning => f.write_str("Scanning..."),
            Notice::Unrecognized { decoded_value } => {
                write!(f, "Unrecognized code: {decoded_value}")
            }
            Notice::Showing { title } => write!(f, "Showing {title}"),
            Notice::Stopped { reason } => write!(f, "Scanner stopped ({reason})"),
        }
    }
}
