//! The stream decoder facade and its decode session.
//!
//! [`StreamDecoder`] is the renderer-facing handle: non-blocking `fill`,
//! async `ready`/`done`, seek, and the lock-free DSP parameter mutators.
//! The decode session runs on a dedicated worker thread, implements the
//! codec driver's sink, and owns the DSP chain.

use std::{sync::Arc, thread};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aulos_codec::{
    CodecDriver, CodecError, MediaBackend, SeekRequest, Stage, StreamInfo, StreamSink,
};
use aulos_dsp::{DspChain, DspParams, EQ_BANDS};
use aulos_events::{DecoderEvent, EventBus};
use aulos_ring::{PcmLayout, PcmRingBuffer};

use crate::{capacity::adaptive_ring_bytes, config::DecoderOptions, seek::SeekCoordinator};

const EVENT_CAPACITY: usize = 256;

/// Placeholder ring used between construction and the demux probe, so
/// `fill` before ready cleanly returns silence.
const PLACEHOLDER_RING_BYTES: usize = 64 * 1024;

/// Swappable handle to the current ring buffer. The placeholder is replaced
/// exactly once, when the true stream parameters are known.
struct RingCell {
    inner: Mutex<Arc<PcmRingBuffer>>,
}

impl RingCell {
    fn new(ring: Arc<PcmRingBuffer>) -> Self {
        Self {
            inner: Mutex::new(ring),
        }
    }

    fn get(&self) -> Arc<PcmRingBuffer> {
        self.inner.lock().clone()
    }

    fn replace(&self, ring: Arc<PcmRingBuffer>) {
        *self.inner.lock() = ring;
    }
}

struct SessionShared {
    ring: RingCell,
    params: Arc<DspParams>,
    seek: SeekCoordinator,
    cancel: CancellationToken,
    bus: EventBus,
    ready_tx: watch::Sender<Option<Result<StreamInfo, CodecError>>>,
    done_tx: watch::Sender<Option<Result<(), CodecError>>>,
    is_http: bool,
    ring_bytes_override: usize,
}

/// Streaming decoder handle.
///
/// Created with a source and options; decoding starts immediately on a
/// worker thread. The handle is `Sync`: `fill` belongs to the render
/// thread, parameter setters and seeks to any control thread.
pub struct StreamDecoder {
    shared: Arc<SessionShared>,
    /// Receiver subscribed before the session starts, so no event can be
    /// missed between construction and the first `subscribe` call.
    events_rx: Mutex<Option<broadcast::Receiver<DecoderEvent>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl StreamDecoder {
    /// Start a decode session for `options.source` against `backend`.
    #[must_use]
    pub fn new(options: DecoderOptions, backend: Arc<dyn MediaBackend>) -> Self {
        let params = Arc::new(DspParams::default());
        params.set_eq_enabled(options.eq_enabled);
        if let Some(gains) = options.eq_gains_db {
            params.set_eq_gains(&gains);
        }

        let placeholder = Arc::new(PcmRingBuffer::new(
            PLACEHOLDER_RING_BYTES,
            PcmLayout {
                sample_rate: if options.sample_rate > 0 { options.sample_rate } else { 48_000 },
                channels: if options.channel_count > 0 { options.channel_count } else { 2 },
                bytes_per_sample: options.sample_format.bytes_per_sample() as u32,
            },
        ));

        let location = options.location();
        let (ready_tx, _) = watch::channel(None);
        let (done_tx, _) = watch::channel(None);

        let shared = Arc::new(SessionShared {
            ring: RingCell::new(placeholder),
            params,
            seek: SeekCoordinator::new(),
            cancel: CancellationToken::new(),
            bus: EventBus::new(EVENT_CAPACITY),
            ready_tx,
            done_tx,
            is_http: location.is_remote(),
            ring_bytes_override: options.ring_bytes,
        });

        let events_rx = shared.bus.subscribe();

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("aulos-decode".to_owned())
            .spawn(move || run_session(worker_shared, backend, options))
            .expect("failed to spawn decode thread");

        Self {
            shared,
            events_rx: Mutex::new(Some(events_rx)),
            worker: Some(worker),
        }
    }

    /// Resolves with the stream parameters once the demux probe and codec
    /// setup are done; fails with the terminal session error otherwise.
    /// Callable any number of times.
    pub async fn ready(&self) -> Result<StreamInfo, CodecError> {
        let mut rx = self.shared.ready_tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().expect("guarded by wait_for"),
            Err(_) => Err(CodecError::new(Stage::Ready, "decoder dropped before ready")),
        }
    }

    /// Resolves when the decode session ends: `Ok` on natural EOS and on
    /// `close`, the terminal error otherwise.
    pub async fn done(&self) -> Result<(), CodecError> {
        let mut rx = self.shared.done_tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().expect("guarded by wait_for"),
            Err(_) => Err(CodecError::new(Stage::Ready, "decoder dropped")),
        }
    }

    /// Subscribe to lifecycle events (ready, progress, error, seek
    /// complete, DRC meters) from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DecoderEvent> {
        self.shared.bus.subscribe()
    }

    /// Take the receiver that was subscribed before the session started.
    /// Unlike [`subscribe`](Self::subscribe) it sees every event, including
    /// ones published while the caller was still wiring things up.
    #[must_use]
    pub fn take_events(&self) -> Option<broadcast::Receiver<DecoderEvent>> {
        self.events_rx.lock().take()
    }

    /// Non-blocking read of decoded PCM; the unread tail of `buf` is
    /// zero-filled. Returns the number of real PCM bytes copied.
    pub fn fill(&self, buf: &mut [u8]) -> usize {
        self.shared.ring.get().read(buf)
    }

    /// All-or-nothing read for pull-based render callbacks: 0 when the
    /// buffer cannot be filled and the stream is still running, otherwise
    /// `buf.len()` (zero-padded after EOS).
    pub fn fill_for_write_data(&self, buf: &mut [u8]) -> usize {
        self.shared.ring.get().read_for_write_data(buf)
    }

    /// Whether the stream ended and every buffered byte was consumed.
    #[must_use]
    pub fn is_eos(&self) -> bool {
        self.shared.ring.get().is_eos()
    }

    /// Current playback position in ms, derived from consumed bytes.
    #[must_use]
    pub fn get_position(&self) -> u64 {
        self.shared.ring.get().position_ms()
    }

    /// Cancel the session. Idempotent; `done` resolves `Ok`.
    pub fn close(&self) {
        debug!("close requested");
        self.shared.cancel.cancel();
        self.shared.ring.get().cancel();
    }

    /// Fire-and-forget seek. Stale PCM stops being served immediately; the
    /// decode thread applies the seek at its next output boundary.
    pub fn seek_to(&self, position_ms: u64) {
        let seq = self.shared.seek.request(position_ms as i64);
        self.shared.ring.get().clear();
        debug!(position_ms, seq, "seek requested");
    }

    /// Seek whose future resolves when the first post-seek PCM reaches the
    /// DSP stage. A newer seek supersedes it (error code −2).
    pub fn seek_to_async(
        &self,
        position_ms: u64,
    ) -> impl Future<Output = Result<(), CodecError>> + Send + 'static {
        let rx = if self.shared.done_tx.borrow().is_some() {
            None
        } else {
            let rx = self.shared.seek.request_async(position_ms as i64);
            self.shared.ring.get().clear();
            debug!(position_ms, "async seek requested");
            Some(rx)
        };

        async move {
            match rx {
                None => Err(CodecError::new(Stage::Seek, "decoder already finished")),
                Some(rx) => match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(CodecError::new(
                        Stage::Seek,
                        "decoder closed before seek completed",
                    )),
                },
            }
        }
    }

    // -- DSP parameter mutators (lock-free, apply at the next buffer) -----

    pub fn set_eq_enabled(&self, enabled: bool) {
        self.shared.params.set_eq_enabled(enabled);
    }

    /// Set all 10 band gains (dB, clamped ±24) for both channels.
    pub fn set_eq_gains(&self, gains_db: &[f32; EQ_BANDS]) {
        self.shared.params.set_eq_gains(gains_db);
    }

    /// Set independent left/right band gains (dB, clamped ±24).
    pub fn set_eq_gains_lr(&self, left_db: &[f32; EQ_BANDS], right_db: &[f32; EQ_BANDS]) {
        self.shared.params.set_eq_gains_lr(left_db, right_db);
    }

    /// Per-channel volume trim, clamped to `[0, 2]`.
    pub fn set_channel_volumes(&self, left: f32, right: f32) {
        self.shared.params.set_channel_volumes(left, right);
    }

    pub fn set_drc_enabled(&self, enabled: bool) {
        self.shared.params.set_drc_enabled(enabled);
    }

    /// Compressor parameters; each value clamped to its legal range.
    pub fn set_drc_params(
        &self,
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
        makeup_db: f32,
    ) {
        self.shared
            .params
            .set_drc_params(threshold_db, ratio, attack_ms, release_ms, makeup_db);
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        self.close();
        // Detach the worker; it exits within one wait quantum.
        drop(self.worker.take());
    }
}

/// Decode-thread body: drive the codec, then settle every promise.
fn run_session(shared: Arc<SessionShared>, backend: Arc<dyn MediaBackend>, options: DecoderOptions) {
    info!(source = %options.source, "decode session started");

    let location = options.location();
    let mut driver = CodecDriver::new(backend, options.driver_options());
    let mut session = DecodeSession {
        shared: shared.clone(),
        chain: None,
    };

    let result = driver.run(&location, &mut session, &shared.cancel);

    let ring = shared.ring.get();
    ring.mark_eos();

    let outcome = if shared.cancel.is_cancelled() {
        info!("decode session cancelled");
        Ok(())
    } else {
        result
    };

    match outcome {
        Ok(()) => {
            shared.ready_tx.send_if_modified(|value| {
                if value.is_none() {
                    *value = Some(Err(CodecError::new(
                        Stage::Ready,
                        "decoder finished before ready",
                    )));
                    true
                } else {
                    false
                }
            });
            if let Some(tx) = shared.seek.take_pending() {
                let _ = tx.send(Err(CodecError::new(
                    Stage::Seek,
                    "decoder finished before seek completed",
                )));
            }
            shared.done_tx.send_replace(Some(Ok(())));
            info!("decode session finished");
        }
        Err(err) => {
            warn!(%err, "decode session failed");
            shared.bus.publish(DecoderEvent::Error(err.clone()));
            ring.cancel();
            shared.ready_tx.send_if_modified(|value| {
                if value.is_none() {
                    *value = Some(Err(err.clone()));
                    true
                } else {
                    false
                }
            });
            if let Some(tx) = shared.seek.take_pending() {
                let _ = tx.send(Err(err.clone()));
            }
            shared.done_tx.send_replace(Some(Err(err)));
        }
    }
}

/// The driver's sink: seek gating, DSP, ring production, event fan-out.
struct DecodeSession {
    shared: Arc<SessionShared>,
    chain: Option<DspChain>,
}

impl StreamSink for DecodeSession {
    fn on_ready(&mut self, info: StreamInfo) {
        let shared = &self.shared;

        let ring_bytes = if shared.ring_bytes_override > 0 {
            shared.ring_bytes_override
        } else {
            adaptive_ring_bytes(&info, shared.is_http)
        };
        let ring = Arc::new(PcmRingBuffer::new(
            ring_bytes,
            PcmLayout {
                sample_rate: info.sample_rate,
                channels: info.channel_count,
                bytes_per_sample: info.sample_format.bytes_per_sample() as u32,
            },
        ));
        shared.ring.replace(ring);

        let meter_bus = shared.bus.clone();
        self.chain = Some(
            DspChain::new(
                shared.params.clone(),
                info.sample_rate,
                info.channel_count,
                info.sample_format,
            )
            .with_emit(Box::new(move |meter| {
                meter_bus.publish(DecoderEvent::DrcMeter {
                    level_db: f64::from(meter.level_db),
                    gain_db: f64::from(meter.gain_db),
                    gr_db: f64::from(meter.gr_db),
                });
            })),
        );

        info!(
            sample_rate = info.sample_rate,
            channels = info.channel_count,
            format = %info.sample_format,
            duration_ms = info.duration_ms,
            ring_bytes,
            "stream ready"
        );

        shared.bus.publish(DecoderEvent::Ready(info));
        shared.ready_tx.send_replace(Some(Ok(info)));
    }

    fn on_progress(&mut self, progress: f64, pts_ms: i64, duration_ms: i64) {
        self.shared.bus.publish(DecoderEvent::Progress {
            progress,
            pts_ms,
            duration_ms,
        });
    }

    fn on_pcm(&mut self, pcm: &[u8], _pts_us: i64) -> bool {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            return false;
        }

        // A requested-but-unapplied seek is in flight: drop this buffer so
        // pre-seek audio can never follow the seek completion.
        if shared.seek.in_flight() {
            return true;
        }

        if let Some(resolved) = shared.seek.resolve_on_output() {
            shared.bus.publish(DecoderEvent::SeekComplete {
                seq: resolved.seq,
                success: true,
                target_ms: resolved.target_ms,
            });
            if let Some(tx) = resolved.tx {
                let _ = tx.send(Ok(()));
            }
        }

        let ring = shared.ring.get();
        match self.chain.as_mut() {
            Some(chain) => ring.push(chain.process(pcm), &shared.cancel),
            None => ring.push(pcm, &shared.cancel),
        }
    }

    fn poll_seek(&mut self) -> Option<SeekRequest> {
        self.shared.seek.poll()
    }

    fn seek_applied(&mut self, seq: u64, ok: bool, target_ms: i64) {
        let shared = &self.shared;
        shared.seek.set_handled(seq);

        if !ok {
            if let Some(tx) = shared.seek.fail_pending(seq) {
                shared.bus.publish(DecoderEvent::SeekComplete {
                    seq,
                    success: false,
                    target_ms,
                });
                let _ = tx.send(Err(CodecError::new(Stage::Seek, "seek failed")));
            }
            return;
        }

        // Drop whatever pre-seek PCM made it into the ring between the
        // request and the apply, then snap the position to the target.
        let ring = shared.ring.get();
        ring.clear();
        ring.set_position_ms(target_ms.max(0) as u64);
        shared.seek.rearm_await(seq);
    }
}
