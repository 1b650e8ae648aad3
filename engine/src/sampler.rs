use scan_resolve_common::frame::Frame;
use tracing::debug;

/// Forwards every Nth frame of a session, counted by sequence number.
///
/// The ordinal of a frame is its distance from the first sequence number the
/// sampler saw, plus one; frame ordinals N, 2N, 3N... are forwarded. When the
/// source skipped sequence numbers, the first frame at or past the next due
/// ordinal is forwarded instead, so there is never more than one forwarded
/// frame per interval. Frames whose sequence number does not advance are
/// rejected, so forwarded frames are always in arrival order.
///
/// One sampler per session; a new session starts counting from scratch.
#[derive(Debug)]
pub struct FrameSampler {
    every_n: u64,
    first_seq: Option<u64>,
    last_seq: Option<u64>,
    next_due: u64,
    received: u64,
    forwarded: u64,
}

impl FrameSampler {
    /// `every_n` of zero is treated as one.
    pub fn new(every_n: u32) -> Self {
        let every_n = u64::from(every_n.max(1));
        Self {
            every_n,
            first_seq: None,
            last_seq: None,
            next_due: every_n,
            received: 0,
            forwarded: 0,
        }
    }

    /// Returns `true` if `frame` should go on to detection.
    pub fn offer(&mut self, frame: &Frame) -> bool {
        self.received += 1;

        if self.last_seq.is_some_and(|last| frame.seq <= last) {
            debug!(seq = frame.seq, last = self.last_seq, "out-of-order frame rejected");
            return false;
        }
        self.last_seq = Some(frame.seq);

        let first = *self.first_seq.get_or_insert(frame.seq);
        let ordinal = frame.seq - first + 1;
        if ordinal < self.next_due {
            return false;
        }

        self.next_due = (ordinal / self.every_n + 1) * self.every_n;
        self.forwarded += 1;
        true
    }

    pub fn every_n(&self) -> u64 {
        self.every_n
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}
