#![forbid(unsafe_code)]

//! Bounded PCM ring buffer shared between the decode thread (producer) and
//! the render thread (consumer).
//!
//! The buffer is the only shared mutable audio data in a decode session.
//! All mutations go through one mutex; `not_empty`/`not_full` condvars gate
//! the two sides. The producer blocks while the buffer is full, the consumer
//! never blocks. A monotonically increasing consumed-byte counter combined
//! with the immutable PCM layout yields the playback position.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// How long a blocked producer sleeps between cancellation re-checks.
///
/// An external [`CancellationToken`] cannot notify the ring's condvars, so
/// waits are bounded to keep cancellation observable within one quantum.
const WAIT_QUANTUM: Duration = Duration::from_millis(100);

/// Immutable PCM layout used for position math.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmLayout {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u32,
}

impl PcmLayout {
    /// Bytes of PCM per second of playback, or 0 when the layout is invalid.
    fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channels) * u64::from(self.bytes_per_sample)
    }
}

#[derive(Debug)]
struct RingState {
    buf: Vec<u8>,
    head: usize,
    tail: usize,
    size: usize,
    eos: bool,
    cancelled: bool,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

/// Thread-safe bounded byte FIFO for decoded PCM.
///
/// - `push` blocks while full and copies each installment in at most two
///   memmoves (pre-wrap and post-wrap).
/// - `read` / `read_for_write_data` are non-blocking.
/// - `clear` empties the buffer; a push blocked mid-way resumes against the
///   now-empty buffer.
/// - Once EOS is marked no further producer writes are accepted; once
///   cancelled both sides return promptly.
#[derive(Debug)]
pub struct PcmRingBuffer {
    inner: Mutex<RingState>,
    not_empty: Condvar,
    not_full: Condvar,
    bytes_consumed: AtomicU64,
    layout: PcmLayout,
}

impl PcmRingBuffer {
    /// Create a ring with `capacity` bytes and the PCM layout used for
    /// position accounting.
    pub fn new(capacity: usize, layout: PcmLayout) -> Self {
        Self {
            inner: Mutex::new(RingState {
                buf: vec![0; capacity.max(1)],
                head: 0,
                tail: 0,
                size: 0,
                eos: false,
                cancelled: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            bytes_consumed: AtomicU64::new(0),
            layout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Bytes currently buffered.
    pub fn available(&self) -> usize {
        self.inner.lock().size
    }

    pub fn layout(&self) -> PcmLayout {
        self.layout
    }

    /// Whether EOS has been marked, regardless of remaining data.
    pub fn is_eos_marked(&self) -> bool {
        self.inner.lock().eos
    }

    /// Whether the stream has ended and every buffered byte was drained.
    pub fn is_eos(&self) -> bool {
        let state = self.inner.lock();
        state.eos && state.size == 0
    }

    /// Mark end of stream. Wakes a consumer waiting for data elsewhere.
    pub fn mark_eos(&self) {
        {
            let mut state = self.inner.lock();
            state.eos = true;
        }
        self.not_empty.notify_all();
    }

    /// Cancel all pending and future operations. Idempotent.
    pub fn cancel(&self) {
        {
            let mut state = self.inner.lock();
            state.cancelled = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Empty the buffer without touching EOS/cancel flags or the position
    /// counter. A producer blocked in `push` resumes against the emptied
    /// buffer.
    pub fn clear(&self) {
        {
            let mut state = self.inner.lock();
            state.head = 0;
            state.tail = 0;
            state.size = 0;
        }
        self.not_full.notify_all();
    }

    /// Enqueue `data`, blocking while the buffer is full.
    ///
    /// Returns `true` when every byte was enqueued, `false` when the ring was
    /// cancelled, `cancel` fired, or EOS had already been marked.
    pub fn push(&self, data: &[u8], cancel: &CancellationToken) -> bool {
        if data.is_empty() {
            return true;
        }

        let mut offset = 0;
        while offset < data.len() {
            if cancel.is_cancelled() {
                return false;
            }

            let mut state = self.inner.lock();
            while state.size == state.capacity() && !state.cancelled {
                let timed_out = self
                    .not_full
                    .wait_for(&mut state, WAIT_QUANTUM)
                    .timed_out();
                if timed_out && cancel.is_cancelled() {
                    return false;
                }
            }
            if state.cancelled || state.eos {
                return false;
            }

            let cap = state.capacity();
            let space = cap - state.size;
            let n = space.min(data.len() - offset);
            let first = n.min(cap - state.tail);
            let tail = state.tail;
            state.buf[tail..tail + first].copy_from_slice(&data[offset..offset + first]);
            let second = n - first;
            if second > 0 {
                state.buf[..second].copy_from_slice(&data[offset + first..offset + n]);
            }
            state.tail = (state.tail + n) % cap;
            state.size += n;
            offset += n;

            drop(state);
            self.not_empty.notify_all();
        }

        true
    }

    /// Non-blocking read of up to `dst.len()` bytes.
    ///
    /// Copies `min(dst.len(), available)` bytes, zero-fills the unread tail
    /// of `dst`, and returns the number of real PCM bytes copied.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let n = {
            let mut state = self.inner.lock();
            self.read_locked(&mut state, dst)
        };
        if n < dst.len() {
            dst[n..].fill(0);
        }
        if n > 0 {
            self.not_full.notify_all();
        }
        n
    }

    /// Read variant for pull-based renderers that must either consume a full
    /// buffer or none at all.
    ///
    /// Returns 0 without consuming anything when fewer than `dst.len()` bytes
    /// are buffered and EOS has not been marked (the renderer should supply
    /// silence). Otherwise copies what is available, zero-pads the rest, and
    /// returns `dst.len()`.
    pub fn read_for_write_data(&self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let n = {
            let mut state = self.inner.lock();
            if state.size < dst.len() && !state.eos {
                return 0;
            }
            self.read_locked(&mut state, dst)
        };
        if n < dst.len() {
            dst[n..].fill(0);
        }
        if n > 0 {
            self.not_full.notify_all();
        }
        dst.len()
    }

    /// Copy out up to `dst.len()` buffered bytes. Caller holds the lock.
    fn read_locked(&self, state: &mut RingState, dst: &mut [u8]) -> usize {
        let cap = state.capacity();
        let n = dst.len().min(state.size);
        if n == 0 {
            return 0;
        }

        let first = n.min(cap - state.head);
        let head = state.head;
        dst[..first].copy_from_slice(&state.buf[head..head + first]);
        let second = n - first;
        if second > 0 {
            dst[first..n].copy_from_slice(&state.buf[..second]);
        }
        state.head = (state.head + n) % cap;
        state.size -= n;

        self.bytes_consumed.fetch_add(n as u64, Ordering::Relaxed);
        trace!(read = n, buffered = state.size, "ring read");
        n
    }

    /// Total bytes handed to the consumer since creation or the last
    /// position override.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed.load(Ordering::Relaxed)
    }

    /// Playback position derived from consumed bytes and the PCM layout.
    pub fn position_ms(&self) -> u64 {
        let per_frame =
            u64::from(self.layout.channels) * u64::from(self.layout.bytes_per_sample);
        if self.layout.sample_rate == 0 || per_frame == 0 {
            return 0;
        }
        let frames = self.bytes_consumed.load(Ordering::Relaxed) / per_frame;
        frames * 1000 / u64::from(self.layout.sample_rate)
    }

    /// Override the consumed-byte counter so `position_ms` reports
    /// `position_ms` after a seek.
    pub fn set_position_ms(&self, position_ms: u64) {
        let bytes = position_ms * self.layout.bytes_per_second() / 1000;
        self.bytes_consumed.store(bytes, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Instant};

    use super::*;

    fn layout_44k_stereo_s16() -> PcmLayout {
        PcmLayout {
            sample_rate: 44_100,
            channels: 2,
            bytes_per_sample: 2,
        }
    }

    fn small_ring(capacity: usize) -> Arc<PcmRingBuffer> {
        Arc::new(PcmRingBuffer::new(capacity, layout_44k_stereo_s16()))
    }

    #[test]
    fn push_then_read_round_trips() {
        let ring = small_ring(64);
        let cancel = CancellationToken::new();
        assert!(ring.push(&[1, 2, 3, 4, 5], &cancel));

        let mut dst = [0u8; 8];
        let n = ring.read(&mut dst);
        assert_eq!(n, 5);
        assert_eq!(&dst[..5], &[1, 2, 3, 4, 5]);
        assert_eq!(&dst[5..], &[0, 0, 0]);
    }

    #[test]
    fn wrap_around_preserves_order() {
        let ring = small_ring(8);
        let cancel = CancellationToken::new();
        let mut dst = [0u8; 6];

        assert!(ring.push(&[1, 2, 3, 4, 5, 6], &cancel));
        assert_eq!(ring.read(&mut dst), 6);
        // head/tail now sit mid-buffer; the next push wraps.
        assert!(ring.push(&[7, 8, 9, 10, 11, 12], &cancel));
        assert_eq!(ring.read(&mut dst), 6);
        assert_eq!(dst, [7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn fifo_integrity_across_threads() {
        let ring = small_ring(64);
        let cancel = CancellationToken::new();
        let total: usize = 16 * 1024;

        let producer_ring = ring.clone();
        let producer_cancel = cancel.clone();
        let producer = thread::spawn(move || {
            let mut next = 0usize;
            while next < total {
                let chunk: Vec<u8> = (next..(next + 37).min(total))
                    .map(|i| (i % 251) as u8)
                    .collect();
                assert!(producer_ring.push(&chunk, &producer_cancel));
                next += chunk.len();
            }
            producer_ring.mark_eos();
        });

        let mut out = Vec::with_capacity(total);
        let mut buf = [0u8; 29];
        while out.len() < total {
            let n = ring.read(&mut buf);
            out.extend_from_slice(&buf[..n]);
            if n == 0 {
                thread::yield_now();
            }
        }
        producer.join().unwrap();

        assert!(ring.is_eos());
        for (i, b) in out.iter().enumerate() {
            assert_eq!(*b, (i % 251) as u8, "byte {i} out of order");
        }
    }

    #[test]
    fn cancel_unblocks_pending_push() {
        let ring = small_ring(4);
        let cancel = CancellationToken::new();
        assert!(ring.push(&[0; 4], &cancel));

        let blocked_ring = ring.clone();
        let blocked_cancel = cancel.clone();
        let producer = thread::spawn(move || blocked_ring.push(&[0; 8], &blocked_cancel));

        thread::sleep(Duration::from_millis(20));
        ring.cancel();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn external_token_unblocks_within_quantum() {
        let ring = small_ring(4);
        let cancel = CancellationToken::new();
        assert!(ring.push(&[0; 4], &cancel));

        let blocked_ring = ring.clone();
        let blocked_cancel = cancel.clone();
        let producer = thread::spawn(move || {
            let started = Instant::now();
            let pushed = blocked_ring.push(&[0; 8], &blocked_cancel);
            (pushed, started.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        // Token cancel only; nothing notifies the ring condvar.
        cancel.cancel();
        let (pushed, waited) = producer.join().unwrap();
        assert!(!pushed);
        assert!(waited < Duration::from_millis(250), "waited {waited:?}");
    }

    #[test]
    fn clear_during_blocked_push_resumes_into_empty_buffer() {
        let ring = small_ring(8);
        let cancel = CancellationToken::new();
        assert!(ring.push(&[9; 8], &cancel));

        let blocked_ring = ring.clone();
        let blocked_cancel = cancel.clone();
        let producer = thread::spawn(move || blocked_ring.push(&[1, 2, 3, 4], &blocked_cancel));

        thread::sleep(Duration::from_millis(20));
        ring.clear();
        assert!(producer.join().unwrap());

        let mut dst = [0u8; 8];
        assert_eq!(ring.read(&mut dst), 4);
        assert_eq!(&dst[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn push_after_eos_is_rejected() {
        let ring = small_ring(16);
        let cancel = CancellationToken::new();
        ring.mark_eos();
        assert!(!ring.push(&[1, 2, 3], &cancel));
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn read_for_write_data_starved_returns_zero() {
        let ring = small_ring(16);
        let cancel = CancellationToken::new();
        assert!(ring.push(&[1, 2, 3], &cancel));

        let mut dst = [0u8; 8];
        assert_eq!(ring.read_for_write_data(&mut dst), 0);
        // Nothing was consumed.
        assert_eq!(ring.available(), 3);
    }

    #[test]
    fn read_for_write_data_full_buffer() {
        let ring = small_ring(16);
        let cancel = CancellationToken::new();
        assert!(ring.push(&[1, 2, 3, 4, 5, 6, 7, 8], &cancel));

        let mut dst = [0u8; 8];
        assert_eq!(ring.read_for_write_data(&mut dst), 8);
        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn read_for_write_data_eos_pads_tail() {
        let ring = small_ring(16);
        let cancel = CancellationToken::new();
        assert!(ring.push(&[1, 2, 3], &cancel));
        ring.mark_eos();

        let mut dst = [9u8; 8];
        assert_eq!(ring.read_for_write_data(&mut dst), 8);
        assert_eq!(dst, [1, 2, 3, 0, 0, 0, 0, 0]);
        // Drained EOS keeps returning padded silence.
        assert_eq!(ring.read_for_write_data(&mut dst), 8);
        assert_eq!(dst, [0; 8]);
        assert!(ring.is_eos());
    }

    #[test]
    fn position_tracks_consumed_bytes() {
        // 44.1kHz stereo S16 = 176400 bytes per second.
        let ring = small_ring(200_000);
        let cancel = CancellationToken::new();
        assert!(ring.push(&vec![0u8; 176_400], &cancel));

        let mut dst = vec![0u8; 88_200];
        assert_eq!(ring.read(&mut dst), 88_200);
        assert_eq!(ring.position_ms(), 500);
        assert_eq!(ring.read(&mut dst), 88_200);
        assert_eq!(ring.position_ms(), 1000);
    }

    #[test]
    fn set_position_overrides_counter() {
        let ring = small_ring(1024);
        let cancel = CancellationToken::new();
        assert!(ring.push(&[0u8; 512], &cancel));
        let mut dst = [0u8; 512];
        ring.read(&mut dst);

        ring.set_position_ms(30_000);
        assert_eq!(ring.position_ms(), 30_000);

        // Position keeps advancing from the override.
        assert!(ring.push(&vec![0u8; 1024], &cancel));
        let mut big = vec![0u8; 176_400 / 1000 * 10]; // 10ms worth
        let _ = ring.read(&mut big);
        assert!(ring.position_ms() >= 30_000);
    }

    #[test]
    fn zero_rate_layout_reports_zero_position() {
        let ring = PcmRingBuffer::new(
            64,
            PcmLayout {
                sample_rate: 0,
                channels: 2,
                bytes_per_sample: 2,
            },
        );
        assert_eq!(ring.position_ms(), 0);
    }
}
