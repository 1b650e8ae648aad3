#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scan_resolve_common::config::RateConfig;
use scan_resolve_common::frame::Frame;
use scan_resolve_common::source::{FrameSource, SourceError, SourceOpener};
use scan_resolve_engine::detect::ScriptedAdapter;
use scan_resolve_engine::{
    ContentRecord, ContentResolver, ContentStore, Diagnostic, EngineOptions, KeyExtraction,
    ScanEngine, ScanEvent, ScanSnapshot, ScanState, StoreError,
};
use tokio::sync::{broadcast, mpsc};

pub type FeedItem = Result<Frame, SourceError>;

/// A camera the test drives by hand: frames are pushed through a channel and
/// dropping the sender ends the stream.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<FeedItem>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next(&mut self) -> Result<Option<Frame>, SourceError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx.close();
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Hands out one prepared [`ChannelSource`] per `open`; fails when none is left.
#[derive(Default)]
pub struct ChannelOpener {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<FeedItem>>>,
    closed: Arc<AtomicBool>,
}

impl ChannelOpener {
    /// Prepare the source for the next session.
    pub fn camera(&self) -> Camera {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().unwrap().push_back(rx);
        Camera { tx }
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceOpener for ChannelOpener {
    async fn open(&self) -> Result<Box<dyn FrameSource>, SourceError> {
        let rx = self
            .pending
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SourceError::Connect("no camera attached".into()))?;
        self.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(ChannelSource {
            rx,
            closed: Arc::clone(&self.closed),
        }))
    }
}

pub struct Camera {
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl Camera {
    pub fn show(&self, seq: u64) {
        let _ = self.tx.send(Ok(frame(seq)));
    }

    pub fn show_all(&self, seqs: impl IntoIterator<Item = u64>) {
        for seq in seqs {
            self.show(seq);
        }
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(SourceError::Stream(reason.into())));
    }

    /// End the stream after the frames already shown.
    pub fn unplug(self) {}
}

pub fn frame(seq: u64) -> Frame {
    Frame::encoded(vec![0u8; 8], seq as i64 * 33, seq)
}

/// A content dictionary that counts lookups.
pub struct CountingStore {
    records: HashMap<String, Arc<ContentRecord>>,
    lookups: AtomicU64,
}

impl CountingStore {
    pub fn library() -> Self {
        let records = [
            ("A", "Letter A"),
            ("B", "Letter B"),
            ("story1", "The Little Red Hen"),
        ]
        .into_iter()
        .map(|(id, title)| {
            let record = ContentRecord {
                id: id.into(),
                title: title.into(),
                body: String::new(),
                attributes: BTreeMap::new(),
            };
            (id.to_string(), Arc::new(record))
        })
        .collect();
        Self {
            records,
            lookups: AtomicU64::new(0),
        }
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl ContentStore for CountingStore {
    fn lookup(&self, id: &str) -> Result<Option<Arc<ContentRecord>>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.get(id).cloned())
    }
}

pub struct Harness {
    pub engine: ScanEngine,
    pub adapter: Arc<ScriptedAdapter>,
    pub store: Arc<CountingStore>,
    pub opener: Arc<ChannelOpener>,
}

/// Lossless handoff so every sampled frame reaches the detector.
pub fn options(every_n: u32, threshold: f32, continuous: bool) -> EngineOptions {
    EngineOptions {
        rate: RateConfig::new(every_n, threshold).unwrap(),
        continuous_rescan: continuous,
        drop_when_busy: false,
        ..EngineOptions::default()
    }
}

pub fn harness(adapter: ScriptedAdapter, options: EngineOptions) -> Harness {
    let adapter = Arc::new(adapter);
    let store = Arc::new(CountingStore::library());
    let opener = Arc::new(ChannelOpener::default());
    let resolver = ContentResolver::new(store.clone(), KeyExtraction::Direct);
    let engine = ScanEngine::new(opener.clone(), adapter.clone(), resolver, options);
    Harness {
        engine,
        adapter,
        store,
        opener,
    }
}

/// Poll snapshots until `pred` holds; panics after five seconds.
pub async fn wait_until(
    engine: &ScanEngine,
    what: &str,
    pred: impl Fn(&ScanSnapshot) -> bool,
) -> ScanSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = engine.snapshot();
        if pred(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}; last snapshot: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Transitions received so far, as `(state, decoded_value)`.
pub fn transitions(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<(ScanState, Option<String>)> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ScanEvent::Transition {
            state,
            decoded_value,
            ..
        } = event
        {
            out.push((state, decoded_value));
        }
    }
    out
}

/// Diagnostics received so far.
pub fn diagnostics(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ScanEvent::Diagnostic(diagnostic) = event {
            out.push(diagnostic);
        }
    }
    out
}
