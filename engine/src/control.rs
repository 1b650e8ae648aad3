use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use scan_resolve_common::config::{ConfigError, RateConfig, ScanConfig};
use scan_resolve_common::frame::Frame;
use scan_resolve_common::source::{FrameSource, SourceOpener};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::detect::DetectionAdapter;
use crate::error::EngineError;
use crate::events::{Diagnostic, ScanEvent, StopReason};
use crate::machine::{Outcome, ScanMachine, ScanSnapshot, SessionCounters};
use crate::pipeline::ScanPipeline;
use crate::resolver::ContentResolver;
use crate::sampler::FrameSampler;

/// Engine-wide settings that hold across sessions.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub rate: RateConfig,
    pub continuous_rescan: bool,
    pub detection_timeout: Duration,
    pub diagnostics: bool,
    pub drop_when_busy: bool,
    pub event_capacity: usize,
}

impl EngineOptions {
    pub fn from_config(config: &ScanConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            rate: config.rate()?,
            continuous_rescan: config.continuous_rescan,
            detection_timeout: Duration::from_millis(config.detection_timeout_ms),
            diagnostics: config.diagnostics,
            drop_when_busy: config.drop_when_busy,
            event_capacity: config.event_capacity,
        })
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            rate: RateConfig::default(),
            continuous_rescan: false,
            detection_timeout: Duration::from_millis(2000),
            diagnostics: true,
            drop_when_busy: true,
            event_capacity: 64,
        }
    }
}

/// Handoff between the producer and consumer tasks of a session.
enum Feed {
    Frame(Frame),
    End(StopReason),
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_sampled: AtomicU64,
    frames_dropped: AtomicU64,
    frames_paused: AtomicU64,
    detections_run: AtomicU64,
    detections_failed: AtomicU64,
    resolutions: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.frames_received,
            &self.frames_sampled,
            &self.frames_dropped,
            &self.frames_paused,
            &self.detections_run,
            &self.detections_failed,
            &self.resolutions,
            &self.misses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> SessionCounters {
        SessionCounters {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sampled: self.frames_sampled.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_paused: self.frames_paused.load(Ordering::Relaxed),
            detections_run: self.detections_run.load(Ordering::Relaxed),
            detections_failed: self.detections_failed.load(Ordering::Relaxed),
            resolutions: self.resolutions.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

struct Session {
    stop: watch::Sender<bool>,
    producer: JoinHandle<()>,
}

/// State shared between the engine handle and its session tasks.
struct Shared {
    machine: Mutex<ScanMachine>,
    events: broadcast::Sender<ScanEvent>,
    counters: Counters,
    diagnostics: bool,
}

impl Shared {
    fn machine(&self) -> MutexGuard<'_, ScanMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: ScanEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn diagnose(&self, diagnostic: Diagnostic) {
        if self.diagnostics {
            self.publish(ScanEvent::Diagnostic(diagnostic));
        }
    }
}

/// The scan-and-resolve engine and its control surface.
///
/// Each session runs two tasks: a producer that reads the frame source and
/// samples it, and a consumer that runs the pipeline one frame at a time and
/// commits results to the state machine. They are joined by a channel with a
/// single slot, so at most one sampled frame waits while a detection runs.
pub struct ScanEngine {
    shared: Arc<Shared>,
    opener: Arc<dyn SourceOpener>,
    adapter: Arc<dyn DetectionAdapter>,
    resolver: Arc<ContentResolver>,
    options: EngineOptions,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl ScanEngine {
    /// `adapter` must already be warmed up; it is reused by every session.
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        adapter: Arc<dyn DetectionAdapter>,
        resolver: ContentResolver,
        options: EngineOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let shared = Arc::new(Shared {
            machine: Mutex::new(ScanMachine::new(options.rate, options.continuous_rescan)),
            events,
            counters: Counters::default(),
            diagnostics: options.diagnostics,
        });
        info!(
            detector = adapter.name(),
            kind = ?adapter.kind(),
            continuous = options.continuous_rescan,
            "scan engine ready"
        );
        Self {
            shared,
            opener,
            adapter,
            resolver: Arc::new(resolver),
            options,
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Idle → Scanning: open a fresh source and start a session.
    pub async fn start(&self) -> Result<ScanSnapshot, EngineError> {
        let mut slot = self.session.lock().await;
        self.shared.machine().check_start()?;

        // A previous session that ended on its own has already closed its source.
        if let Some(previous) = slot.take() {
            let _ = previous.producer.await;
        }

        let source = self.opener.open().await.map_err(|e| {
            error!(error = %e, "failed to open frame source");
            EngineError::Source(e)
        })?;

        let (session, rate) = {
            let mut machine = self.shared.machine();
            let event = machine.start()?;
            self.shared.counters.reset();
            self.shared.publish(event);
            (machine.session(), machine.rate())
        };

        let pipeline = ScanPipeline::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.resolver),
            rate.confidence_threshold,
            self.options.detection_timeout,
        );
        let (feed_tx, feed_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);

        let producer = tokio::spawn(produce(
            source,
            FrameSampler::new(rate.sample_every_n_frames),
            feed_tx,
            stop_rx,
            self.options.drop_when_busy,
            Arc::clone(&self.shared),
        ));
        tokio::spawn(consume(session, pipeline, feed_rx, Arc::clone(&self.shared)));

        *slot = Some(Session {
            stop: stop_tx,
            producer,
        });
        Ok(self.snapshot())
    }

    /// → Idle. The source is closed before this returns; a detection still in
    /// flight finishes in the background and its result is discarded.
    pub async fn stop(&self) -> Result<ScanSnapshot, EngineError> {
        let mut slot = self.session.lock().await;
        if let Some(event) = self.shared.machine().stop() {
            self.shared.publish(event);
        }
        if let Some(session) = slot.take() {
            let _ = session.stop.send(true);
            if let Err(e) = session.producer.await {
                warn!(error = %e, "frame producer did not shut down cleanly");
            }
        }
        Ok(self.snapshot())
    }

    /// Resolved → Scanning when continuous rescanning is off.
    pub fn rescan(&self) -> Result<ScanSnapshot, EngineError> {
        let event = self.shared.machine().rescan()?;
        self.shared.publish(event);
        Ok(self.snapshot())
    }

    /// Set the rate for the next session. Only while idle.
    pub fn configure(&self, rate: RateConfig) -> Result<(), EngineError> {
        self.shared.machine().configure(rate)
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        let counters = self.shared.counters.snapshot();
        self.shared.machine().snapshot(counters)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }
}

/// Read, sample and hand off frames until stopped or the source ends.
async fn produce(
    mut source: Box<dyn FrameSource>,
    mut sampler: FrameSampler,
    feed: mpsc::Sender<Feed>,
    mut stop: watch::Receiver<bool>,
    drop_when_busy: bool,
    shared: Arc<Shared>,
) {
    let counters = &shared.counters;
    let source_name = source.name().to_string();
    info!(source = %source_name, every_n = sampler.every_n(), "frame producer started");

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = stop.changed() => break None,
            next = source.next() => next,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => break Some(StopReason::SourceEnded),
            Err(e) => {
                error!(source = %source_name, error = %e, "frame source failed");
                break Some(StopReason::SourceFailed(e.to_string()));
            }
        };

        Counters::bump(&counters.frames_received);
        if !sampler.offer(&frame) {
            continue;
        }
        Counters::bump(&counters.frames_sampled);

        let seq = frame.seq;
        if drop_when_busy {
            match feed.try_send(Feed::Frame(frame)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(seq, "pipeline busy, sampled frame dropped");
                    Counters::bump(&counters.frames_dropped);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break None,
            }
        } else {
            tokio::select! {
                biased;
                _ = stop.changed() => break None,
                sent = feed.send(Feed::Frame(frame)) => {
                    if sent.is_err() {
                        break None;
                    }
                }
            }
        }
    };

    source.close().await;
    info!(
        source = %source_name,
        received = sampler.received(),
        sampled = sampler.forwarded(),
        "frame producer stopped"
    );

    if let Some(reason) = reason {
        // Queued frames are processed first.
        let _ = feed.send(Feed::End(reason)).await;
    }
}

/// Run the pipeline on each handed-off frame and commit the outcome.
async fn consume(
    session: u64,
    pipeline: ScanPipeline,
    mut feed: mpsc::Receiver<Feed>,
    shared: Arc<Shared>,
) {
    let counters = &shared.counters;

    while let Some(item) = feed.recv().await {
        let frame = match item {
            Feed::Frame(frame) => frame,
            Feed::End(reason) => {
                if let Some(event) = shared.machine().end_session(session, reason) {
                    shared.publish(event);
                }
                break;
            }
        };

        let (epoch, last_accepted) = {
            let machine = shared.machine();
            if machine.session() != session {
                break;
            }
            if !machine.pipeline_active() {
                Counters::bump(&counters.frames_paused);
                continue;
            }
            (machine.epoch(), machine.last_accepted().map(str::to_owned))
        };

        let report = pipeline
            .process_frame(&frame, last_accepted.as_deref())
            .await;

        let mut machine = shared.machine();
        if !machine.is_current(epoch) {
            debug!(seq = frame.seq, "state changed during detection, result discarded");
            continue;
        }

        Counters::bump(&counters.detections_run);
        if report.detection_failed() {
            Counters::bump(&counters.detections_failed);
        }
        match &report.outcome {
            Outcome::Resolved { .. } => Counters::bump(&counters.resolutions),
            Outcome::Miss { .. } => Counters::bump(&counters.misses),
            Outcome::NoChange => {}
        }
        for diagnostic in report.diagnostics {
            shared.diagnose(diagnostic);
        }
        if let Some(event) = machine.commit(epoch, report.outcome) {
            shared.publish(event);
        }
    }

    debug!(session, "pipeline consumer finished");
}
