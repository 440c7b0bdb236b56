//! Sequence-ordered seek coordination between the control thread and the
//! decode thread.
//!
//! The control thread writes the `(target_ms, seq)` pair under a short lock;
//! the decode thread polls lock-free at output-buffer boundaries and applies
//! the newest request. Requests arriving while one is pending coalesce: only
//! the latest sequence is ever applied, and an earlier async completion is
//! rejected as superseded.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use aulos_codec::{CodecError, SeekRequest, Stage};

pub(crate) type SeekCompletion = oneshot::Sender<Result<(), CodecError>>;

struct PendingSeek {
    seq: u64,
    tx: SeekCompletion,
}

/// A first-post-seek-output completion ready to be resolved.
pub(crate) struct ResolvedSeek {
    pub seq: u64,
    pub target_ms: i64,
    pub tx: Option<SeekCompletion>,
}

#[derive(Default)]
pub(crate) struct SeekCoordinator {
    /// Guards the ordered `(target_ms, requested_seq)` write only.
    request_lock: Mutex<()>,
    target_ms: AtomicI64,
    requested_seq: AtomicU64,
    handled_seq: AtomicU64,
    /// Armed by async requests: the first output produced while
    /// `handled_seq == await_seq` resolves the pending completion.
    await_output: AtomicBool,
    await_seq: AtomicU64,
    pending: Mutex<Option<PendingSeek>>,
}

impl SeekCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fire-and-forget seek request. Returns its sequence number.
    pub fn request(&self, target_ms: i64) -> u64 {
        let _guard = self.request_lock.lock();
        // Target is visible before the sequence increment, so a poll that
        // sees the new sequence always reads the matching target.
        self.target_ms.store(target_ms, Ordering::Relaxed);
        self.requested_seq.fetch_add(1, Ordering::Release) + 1
    }

    /// Record an awaited seek request; the returned receiver resolves when
    /// the first post-seek PCM reaches the DSP stage.
    ///
    /// A previous pending completion is rejected as superseded (code −2).
    pub fn request_async(&self, target_ms: i64) -> oneshot::Receiver<Result<(), CodecError>> {
        let (tx, rx) = oneshot::channel();

        if let Some(prev) = self.pending.lock().take() {
            let _ = prev.tx.send(Err(CodecError::with_code(
                Stage::Seek,
                -2,
                "seek superseded by a newer request",
            )));
        }

        let seq = self.request(target_ms);
        *self.pending.lock() = Some(PendingSeek { seq, tx });
        self.await_seq.store(seq, Ordering::Release);
        self.await_output.store(true, Ordering::Release);
        rx
    }

    /// Whether a request has been made that the decode thread has not yet
    /// applied. PCM produced in this window is dropped.
    pub fn in_flight(&self) -> bool {
        self.requested_seq.load(Ordering::Acquire) != self.handled_seq.load(Ordering::Acquire)
    }

    /// Decode-thread poll: the newest unapplied request, if any.
    pub fn poll(&self) -> Option<SeekRequest> {
        let requested = self.requested_seq.load(Ordering::Acquire);
        if requested == self.handled_seq.load(Ordering::Acquire) {
            return None;
        }
        Some(SeekRequest {
            target_ms: self.target_ms.load(Ordering::Relaxed),
            seq: requested,
        })
    }

    /// Advance the handled sequence so PCM output resumes.
    pub fn set_handled(&self, seq: u64) {
        self.handled_seq.store(seq, Ordering::Release);
    }

    /// Re-arm the first-output trigger after a successfully applied seek.
    pub fn rearm_await(&self, seq: u64) {
        self.await_seq.store(seq, Ordering::Release);
    }

    /// A seek application failed: disarm the trigger and hand back the
    /// pending completion if it belongs to `seq`.
    pub fn fail_pending(&self, seq: u64) -> Option<SeekCompletion> {
        if !self.await_output.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.take_pending_if(seq)
    }

    /// Called for every PCM buffer that passes the drop-in-flight gate.
    /// Returns the completion to resolve when this is the first output of
    /// an awaited, applied seek.
    pub fn resolve_on_output(&self) -> Option<ResolvedSeek> {
        if !self.await_output.load(Ordering::Acquire) {
            return None;
        }
        let seq = self.await_seq.load(Ordering::Acquire);
        if seq == 0 || seq != self.handled_seq.load(Ordering::Acquire) {
            return None;
        }
        if !self.await_output.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(ResolvedSeek {
            seq,
            target_ms: self.target_ms.load(Ordering::Relaxed),
            tx: self.take_pending_if(seq),
        })
    }

    /// Take the pending completion regardless of sequence (session teardown).
    pub fn take_pending(&self) -> Option<SeekCompletion> {
        self.pending.lock().take().map(|p| p.tx)
    }

    fn take_pending_if(&self, seq: u64) -> Option<SeekCompletion> {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|p| p.seq == seq) {
            pending.take().map(|p| p.tx)
        } else {
            None
        }
    }
}
