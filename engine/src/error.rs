use std::time::Duration;

use scan_resolve_common::config::ConfigError;
use scan_resolve_common::source::SourceError;

use crate::machine::ScanState;

/// Failures surfaced to the caller of a control command.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{command} is not allowed while {state}")]
    InvalidCommand {
        command: &'static str,
        state: ScanState,
    },
    #[error("frame source unavailable: {0}")]
    Source(#[from] SourceError),
}

/// A detector failure on a single frame. Never fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("failed to decode frame image: {0}")]
    Decode(String),
    #[error("detector backend error: {0}")]
    Backend(String),
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("detection timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read content file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse content file: {0}")]
    Parse(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("malformed record {id}: {reason}")]
    Record { id: String, reason: String },
    #[error("unknown store backend '{0}', expected 'toml' or 'sqlite'")]
    Backend(String),
    #[error("content store lock poisoned")]
    Poisoned,
}
