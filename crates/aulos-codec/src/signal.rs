//! Buffer-availability queues between a callback-based platform codec and
//! the decode thread.
//!
//! The platform codec announces "input buffer free" / "output buffer ready"
//! events from its own threads; each lands as a ticket in a mutex+condvar
//! queue the decode thread pops with a bounded, cancel-aware wait. Buffers
//! travel as `Arc<Mutex<SampleBuf>>` handles paired with the codec lifetime:
//! on destroy the codec detaches the signal, which wakes every waiter
//! instead of leaving them pointing at freed buffers.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

/// Attributes travelling with a buffer: payload size, presentation
/// timestamp in µs, and the end-of-stream marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferAttr {
    pub size: usize,
    pub pts_us: i64,
    pub eos: bool,
}

/// A reusable sample buffer slot.
#[derive(Debug, Default)]
pub struct SampleBuf {
    pub data: Vec<u8>,
    pub attr: BufferAttr,
}

impl SampleBuf {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            attr: BufferAttr::default(),
        }
    }

    /// Fill the slot with a payload and timestamp, clearing the EOS flag.
    pub fn set_payload(&mut self, payload: &[u8], pts_us: i64) {
        self.data.clear();
        self.data.extend_from_slice(payload);
        self.attr = BufferAttr {
            size: payload.len(),
            pts_us,
            eos: false,
        };
    }

    /// Turn the slot into an empty EOS marker.
    pub fn set_eos(&mut self) {
        self.data.clear();
        self.attr = BufferAttr {
            size: 0,
            pts_us: 0,
            eos: true,
        };
    }

    /// The valid bytes of the slot.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.attr.size.min(self.data.len())]
    }
}

/// A buffer slot announcement: which slot, and the shared handle to it.
#[derive(Clone, Debug)]
pub struct BufferTicket {
    pub index: u32,
    pub buf: Arc<Mutex<SampleBuf>>,
}

/// Result of waiting on a [`BufferQueue`].
#[derive(Debug)]
pub enum WaitOutcome {
    Ticket(BufferTicket),
    TimedOut,
    Cancelled,
    /// The owning codec was destroyed; no more tickets will ever arrive.
    Detached,
}

#[derive(Debug, Default)]
struct QueueState {
    tickets: VecDeque<BufferTicket>,
    detached: bool,
}

/// One direction (input or output) of the codec's availability callbacks.
#[derive(Debug, Default)]
pub struct BufferQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl BufferQueue {
    /// Announce a buffer. Called from the codec side.
    pub fn push(&self, ticket: BufferTicket) {
        {
            let mut state = self.state.lock();
            state.tickets.push_back(ticket);
        }
        self.cond.notify_all();
    }

    /// Pop the next ticket, waiting up to `timeout`.
    ///
    /// The cancel token is re-checked before the wait and on every wake, so
    /// cancellation is observed within one timeout quantum even though the
    /// token cannot notify this condvar.
    pub fn wait_pop(&self, timeout: Duration, cancel: &CancellationToken) -> WaitOutcome {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(ticket) = state.tickets.pop_front() {
                return WaitOutcome::Ticket(ticket);
            }
            if state.detached {
                return WaitOutcome::Detached;
            }
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return if cancel.is_cancelled() {
                    WaitOutcome::Cancelled
                } else if let Some(ticket) = state.tickets.pop_front() {
                    WaitOutcome::Ticket(ticket)
                } else if state.detached {
                    WaitOutcome::Detached
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
    }

    /// Drop all queued tickets (codec flush).
    pub fn clear(&self) {
        self.state.lock().tickets.clear();
    }

    /// Mark the queue dead and wake every waiter.
    pub fn detach(&self) {
        {
            let mut state = self.state.lock();
            state.detached = true;
            state.tickets.clear();
        }
        self.cond.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tickets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Paired input/output availability queues of one codec instance.
#[derive(Debug, Default)]
pub struct CodecSignal {
    input: BufferQueue,
    output: BufferQueue,
}

impl CodecSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn input(&self) -> &BufferQueue {
        &self.input
    }

    #[must_use]
    pub fn output(&self) -> &BufferQueue {
        &self.output
    }

    /// Drop queued tickets on both sides (seek flush).
    pub fn clear_all(&self) {
        self.input.clear();
        self.output.clear();
    }

    /// Wake and permanently fail all waiters (codec destroyed).
    pub fn detach_all(&self) {
        self.input.detach();
        self.output.detach();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn ticket(index: u32) -> BufferTicket {
        BufferTicket {
            index,
            buf: Arc::new(Mutex::new(SampleBuf::with_capacity(16))),
        }
    }

    #[test]
    fn push_then_pop_in_order() {
        let queue = BufferQueue::default();
        let cancel = CancellationToken::new();
        queue.push(ticket(1));
        queue.push(ticket(2));

        match queue.wait_pop(Duration::from_millis(10), &cancel) {
            WaitOutcome::Ticket(t) => assert_eq!(t.index, 1),
            other => panic!("expected ticket, got {other:?}"),
        }
        match queue.wait_pop(Duration::from_millis(10), &cancel) {
            WaitOutcome::Ticket(t) => assert_eq!(t.index, 2),
            other => panic!("expected ticket, got {other:?}"),
        }
    }

    #[test]
    fn empty_queue_times_out() {
        let queue = BufferQueue::default();
        let cancel = CancellationToken::new();
        let started = Instant::now();
        assert!(matches!(
            queue.wait_pop(Duration::from_millis(30), &cancel),
            WaitOutcome::TimedOut
        ));
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let queue = BufferQueue::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        assert!(matches!(
            queue.wait_pop(Duration::from_secs(5), &cancel),
            WaitOutcome::Cancelled
        ));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn push_wakes_waiter() {
        let queue = Arc::new(BufferQueue::default());
        let cancel = CancellationToken::new();

        let waiter_queue = queue.clone();
        let waiter = thread::spawn(move || {
            let cancel = CancellationToken::new();
            waiter_queue.wait_pop(Duration::from_secs(2), &cancel)
        });

        thread::sleep(Duration::from_millis(20));
        queue.push(ticket(7));
        match waiter.join().unwrap() {
            WaitOutcome::Ticket(t) => assert_eq!(t.index, 7),
            other => panic!("expected ticket, got {other:?}"),
        }
        let _ = cancel;
    }

    #[test]
    fn detach_wakes_and_stays_dead() {
        let queue = Arc::new(BufferQueue::default());

        let waiter_queue = queue.clone();
        let waiter = thread::spawn(move || {
            let cancel = CancellationToken::new();
            waiter_queue.wait_pop(Duration::from_secs(2), &cancel)
        });

        thread::sleep(Duration::from_millis(20));
        queue.detach();
        assert!(matches!(waiter.join().unwrap(), WaitOutcome::Detached));

        // Post-detach waits fail immediately.
        let cancel = CancellationToken::new();
        assert!(matches!(
            queue.wait_pop(Duration::from_millis(1), &cancel),
            WaitOutcome::Detached
        ));
    }

    #[test]
    fn clear_drops_pending_tickets() {
        let signal = CodecSignal::new();
        signal.input().push(ticket(1));
        signal.output().push(ticket(2));
        signal.clear_all();
        assert!(signal.input().is_empty());
        assert!(signal.output().is_empty());
    }

    #[test]
    fn sample_buf_payload_round_trip() {
        let mut buf = SampleBuf::with_capacity(8);
        buf.set_payload(&[1, 2, 3], 42);
        assert_eq!(buf.payload(), &[1, 2, 3]);
        assert_eq!(buf.attr.pts_us, 42);
        assert!(!buf.attr.eos);

        buf.set_eos();
        assert!(buf.attr.eos);
        assert!(buf.payload().is_empty());
    }
}
