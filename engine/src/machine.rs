use std::fmt;
use std::sync::Arc;

use scan_resolve_common::config::RateConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::events::{Notice, ScanEvent, StopReason};
use crate::resolver::ContentRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// No active sampling.
    Idle,
    /// Every sampled frame runs through the pipeline.
    Scanning,
    /// A record is on display.
    Resolved,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
            ScanState::Resolved => "resolved",
        })
    }
}

/// Result of running the pipeline on one sampled frame.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A new value resolved to a record.
    Resolved {
        value: String,
        record: Arc<ContentRecord>,
    },
    /// A new value the store does not know.
    Miss { value: String },
    /// Nothing new in the frame, or the frame failed.
    NoChange,
}

/// Per-session counters, filled in by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub frames_received: u64,
    pub frames_sampled: u64,
    pub frames_dropped: u64,
    pub frames_paused: u64,
    pub detections_run: u64,
    pub detections_failed: u64,
    pub resolutions: u64,
    pub misses: u64,
}

/// A consistent copy of the machine for readers.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSnapshot {
    pub state: ScanState,
    pub last_accepted_value: Option<String>,
    pub record: Option<Arc<ContentRecord>>,
    pub last_miss: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub session: u64,
    pub rate: RateConfig,
    pub continuous_rescan: bool,
    pub notice: Notice,
    pub message: String,
    pub counters: SessionCounters,
}

/// The scan state and every rule about how it may change.
///
/// Holds no locks and does no I/O; the engine wraps it in a single mutex so
/// a reader always sees `state`, `last_accepted_value` and `record` from the
/// same transition.
///
/// `session` increases on every `start`. `epoch` increases on every
/// transition; pipeline results are committed against the epoch they were
/// computed under and discarded if it has moved on.
#[derive(Debug)]
pub struct ScanMachine {
    state: ScanState,
    last_accepted: Option<String>,
    record: Option<Arc<ContentRecord>>,
    last_miss: Option<String>,
    stop_reason: Option<StopReason>,
    rate: RateConfig,
    continuous: bool,
    session: u64,
    epoch: u64,
}

impl ScanMachine {
    pub fn new(rate: RateConfig, continuous: bool) -> Self {
        Self {
            state: ScanState::Idle,
            last_accepted: None,
            record: None,
            last_miss: None,
            stop_reason: None,
            rate,
            continuous,
            session: 0,
            epoch: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn last_accepted(&self) -> Option<&str> {
        self.last_accepted.as_deref()
    }

    pub fn record(&self) -> Option<&Arc<ContentRecord>> {
        self.record.as_ref()
    }

    pub fn rate(&self) -> RateConfig {
        self.rate
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether sampled frames should be run through the pipeline.
    pub fn pipeline_active(&self) -> bool {
        match self.state {
            ScanState::Idle => false,
            ScanState::Scanning => true,
            ScanState::Resolved => self.continuous,
        }
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    fn require(&self, command: &'static str, allowed: bool) -> Result<(), EngineError> {
        if allowed {
            Ok(())
        } else {
            Err(EngineError::InvalidCommand {
                command,
                state: self.state,
            })
        }
    }

    pub fn check_start(&self) -> Result<(), EngineError> {
        self.require("start", self.state == ScanState::Idle)
    }

    /// Idle → Scanning. Opens a new session with empty dedup state.
    pub fn start(&mut self) -> Result<ScanEvent, EngineError> {
        self.check_start()?;
        self.session += 1;
        self.last_accepted = None;
        self.record = None;
        self.last_miss = None;
        self.stop_reason = None;
        info!(
            session = self.session,
            every_n = self.rate.sample_every_n_frames,
            threshold = self.rate.confidence_threshold,
            continuous = self.continuous,
            "IDLE→SCANNING: session started"
        );
        Ok(self.transition(ScanState::Scanning))
    }

    /// Scanning/Resolved → Idle. A no-op while already idle.
    pub fn stop(&mut self) -> Option<ScanEvent> {
        if self.state == ScanState::Idle {
            debug!("stop while idle ignored");
            return None;
        }
        info!(session = self.session, from = %self.state, "→IDLE: stopped by request");
        Some(self.release(StopReason::Requested))
    }

    /// Resolved → Scanning, only when continuous rescanning is off.
    ///
    /// The displayed record and `last_accepted_value` are kept, so the code
    /// still in view does not immediately resolve again.
    pub fn rescan(&mut self) -> Result<ScanEvent, EngineError> {
        self.require(
            "rescan",
            self.state == ScanState::Resolved && !self.continuous,
        )?;
        self.last_miss = None;
        info!(session = self.session, "RESOLVED→SCANNING: rescan requested");
        Ok(self.transition(ScanState::Scanning))
    }

    /// Replace the rate used by the next session. Only while idle.
    pub fn configure(&mut self, rate: RateConfig) -> Result<(), EngineError> {
        rate.validate()?;
        self.require("configure", self.state == ScanState::Idle)?;
        info!(
            every_n = rate.sample_every_n_frames,
            threshold = rate.confidence_threshold,
            "rate reconfigured"
        );
        self.rate = rate;
        Ok(())
    }

    /// Apply a pipeline outcome computed under `epoch`. Returns the
    /// transition event if the state changed.
    pub fn commit(&mut self, epoch: u64, outcome: Outcome) -> Option<ScanEvent> {
        if !self.is_current(epoch) || !self.pipeline_active() {
            debug!(epoch, current = self.epoch, "stale pipeline result discarded");
            return None;
        }
        match outcome {
            Outcome::Resolved { value, record } => {
                info!(
                    session = self.session,
                    from = %self.state,
                    value,
                    title = record.title,
                    "→RESOLVED: content loaded"
                );
                self.last_accepted = Some(value);
                self.record = Some(record);
                self.last_miss = None;
                Some(self.transition(ScanState::Resolved))
            }
            Outcome::Miss { value } => {
                debug!(session = self.session, value = %value, "unrecognized value, state unchanged");
                self.last_miss = Some(value);
                None
            }
            Outcome::NoChange => None,
        }
    }

    /// End `session` because its source stopped. Ignored if that session is
    /// already over.
    pub fn end_session(&mut self, session: u64, reason: StopReason) -> Option<ScanEvent> {
        if session != self.session || self.state == ScanState::Idle {
            return None;
        }
        match &reason {
            StopReason::SourceFailed(err) => {
                warn!(session, error = err.as_str(), "→IDLE: frame source failed")
            }
            _ => info!(session, %reason, "→IDLE: session ended"),
        }
        Some(self.release(reason))
    }

    fn release(&mut self, reason: StopReason) -> ScanEvent {
        self.last_accepted = None;
        self.record = None;
        self.last_miss = None;
        self.stop_reason = Some(reason);
        self.transition(ScanState::Idle)
    }

    fn transition(&mut self, state: ScanState) -> ScanEvent {
        self.state = state;
        self.epoch += 1;
        ScanEvent::Transition {
            state,
            decoded_value: self.last_accepted.clone(),
            record: self.record.clone(),
        }
    }

    pub fn notice(&self) -> Notice {
        match self.state {
            ScanState::Idle => match &self.stop_reason {
                Some(reason @ (StopReason::SourceEnded | StopReason::SourceFailed(_))) => {
                    Notice::Stopped {
                        reason: reason.clone(),
                    }
                }
                _ => Notice::NothingScanned,
            },
            ScanState::Scanning => match &self.last_miss {
                Some(value) => Notice::Unrecognized {
                    decoded_value: value.clone(),
                },
                None => Notice::Scanning,
            },
            ScanState::Resolved => Notice::Showing {
                title: self
                    .record
                    .as_ref()
                    .map(|r| r.title.clone())
                    .unwrap_or_default(),
            },
        }
    }

    pub fn snapshot(&self, counters: SessionCounters) -> ScanSnapshot {
        let notice = self.notice();
        ScanSnapshot {
            state: self.state,
            last_accepted_value: self.last_accepted.clone(),
            record: self.record.clone(),
            last_miss: self.last_miss.clone(),
            stop_reason: self.stop_reason.clone(),
            session: self.session,
            rate: self.rate,
            continuous_rescan: self.continuous,
            message: notice.to_string(),
            notice,
            counters,
        }
    }
}
