//! The decode orchestration loop.
//!
//! Drives the platform demuxer and decoder for one session: open → probe →
//! track select → codec setup → input/output buffer pumps → EOS. Raw PCM
//! containers bypass the codec entirely (passthrough mode). Seek requests
//! are polled at every output-buffer boundary so the codec state machine
//! stays single-threaded.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aulos_dsp::SampleFormat;

use crate::{
    error::{CodecError, CodecResult, Stage},
    platform::{CodecFormat, MediaBackend, PlatformCodec, PlatformDemuxer, SourceLocation, TrackInfo},
    signal::{SampleBuf, WaitOutcome},
    types::StreamInfo,
};

/// Raw-passthrough watchdog: consecutive empty demuxer reads tolerated
/// before the session is declared stuck.
pub const MAX_NO_DATA_RETRIES: u32 = 100;

/// Decode-mode watchdog: consecutive loop iterations in which neither pump
/// made progress before the session is declared stuck.
const MAX_IDLE_LOOPS: u32 = 100_000;

/// Upper bound on a single input/output buffer wait.
const BUFFER_WAIT: Duration = Duration::from_millis(200);

const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_CHANNELS: u16 = 2;

/// A pending seek picked up by the driver at an output-buffer boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekRequest {
    pub target_ms: i64,
    pub seq: u64,
}

/// Receiver of everything the driver produces. Implemented by the session
/// owner and called exclusively from the decode thread.
pub trait StreamSink {
    /// Stream parameters are known and the codec is running.
    fn on_ready(&mut self, info: StreamInfo);

    /// Throttled progress: `progress` is 0..=1, or −1 when the duration is
    /// unknown.
    fn on_progress(&mut self, progress: f64, pts_ms: i64, duration_ms: i64);

    /// One decoded (or passthrough) PCM buffer. Return `false` to stop the
    /// session; the driver treats that as a graceful cancellation.
    fn on_pcm(&mut self, pcm: &[u8], pts_us: i64) -> bool;

    /// Poll for a pending seek. Called at every output-buffer boundary.
    fn poll_seek(&mut self) -> Option<SeekRequest>;

    /// The seek attempt for `seq` was applied (or failed).
    fn seek_applied(&mut self, seq: u64, ok: bool, target_ms: i64);
}

/// Caller overrides for codec configuration. Zero means "use the probed
/// value", falling back to 44100 Hz / 2 channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverOptions {
    pub sample_rate: u32,
    pub channel_count: u16,
    /// 0 = leave unset on the codec.
    pub bitrate: u32,
    pub sample_format: SampleFormat,
}

enum Step {
    /// Nothing happened (wait timed out / cancel pending).
    Idle,
    /// A buffer moved.
    Progressed,
    /// End of stream observed on this pump.
    Eos,
    /// The sink asked to stop.
    Stopped,
}

/// Drives one decode session against a [`MediaBackend`].
pub struct CodecDriver {
    backend: std::sync::Arc<dyn MediaBackend>,
    options: DriverOptions,
    duration_ms: i64,
    last_progress_percent: i32,
    last_progress_pts_ms: i64,
}

impl CodecDriver {
    #[must_use]
    pub fn new(backend: std::sync::Arc<dyn MediaBackend>, options: DriverOptions) -> Self {
        Self {
            backend,
            options,
            duration_ms: 0,
            last_progress_percent: -1,
            last_progress_pts_ms: -1,
        }
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok(())` on natural EOS, on cancellation, and when the sink
    /// stops the stream; any codec failure is terminal and carries its stage.
    pub fn run(
        &mut self,
        source: &SourceLocation,
        sink: &mut dyn StreamSink,
        cancel: &CancellationToken,
    ) -> CodecResult<()> {
        self.duration_ms = 0;
        self.last_progress_percent = -1;
        self.last_progress_pts_ms = -1;

        sink.on_progress(0.0, 0, 0);

        if cancel.is_cancelled() {
            info!("decode cancelled before start");
            return Ok(());
        }

        let src = match source {
            SourceLocation::Local(path) => self
                .backend
                .open_path(path)
                .map_err(|e| e.at(Stage::Source))?,
            SourceLocation::Remote(url) => self
                .backend
                .open_uri(url)
                .map_err(|e| e.at(Stage::Source))?,
        };

        let container = src.container_info().map_err(|e| e.at(Stage::Source))?;
        self.duration_ms = container.duration_ms.max(0);
        debug!(
            tracks = container.track_count,
            duration_ms = self.duration_ms,
            remote = source.is_remote(),
            "source opened"
        );

        let mut demuxer = self
            .backend
            .create_demuxer(&src)
            .map_err(|e| e.at(Stage::CreateDemuxer))?;

        // First track whose MIME says audio.
        let mut audio = None;
        for index in 0..container.track_count {
            if let Ok(track) = src.track_info(index)
                && track.mime.starts_with("audio")
            {
                audio = Some((index, track));
                break;
            }
        }
        let Some((track_index, track)) = audio else {
            return Err(CodecError::new(Stage::Track, "no audio track found"));
        };
        info!(track_index, mime = %track.mime, "audio track selected");

        if track.mime == "audio/raw" {
            return self.run_passthrough(demuxer.as_mut(), track_index, &track, sink, cancel);
        }

        self.run_decode(demuxer.as_mut(), track_index, &track, sink, cancel)
    }

    /// Decode path: platform codec between demuxer and sink.
    fn run_decode(
        &mut self,
        demuxer: &mut dyn PlatformDemuxer,
        track_index: u32,
        track: &TrackInfo,
        sink: &mut dyn StreamSink,
        cancel: &CancellationToken,
    ) -> CodecResult<()> {
        let mut codec = self
            .backend
            .create_codec(&track.mime)
            .map_err(|e| e.at(Stage::InitDecoder))?;

        // Caller overrides win, then probed values, then defaults.
        let format = CodecFormat {
            sample_rate: pick(self.options.sample_rate, track.sample_rate, DEFAULT_SAMPLE_RATE),
            channel_count: pick(self.options.channel_count, track.channel_count, DEFAULT_CHANNELS),
            bitrate: self.options.bitrate,
            sample_format: self.options.sample_format,
        };

        codec.configure(&format).map_err(|e| e.at(Stage::Configure))?;
        codec.prepare().map_err(|e| e.at(Stage::Start))?;
        codec.start().map_err(|e| e.at(Stage::Start))?;

        sink.on_ready(StreamInfo {
            sample_rate: format.sample_rate,
            channel_count: format.channel_count,
            sample_format: format.sample_format,
            duration_ms: self.duration_ms,
        });

        demuxer
            .select_track(track_index)
            .map_err(|e| e.at(Stage::SelectTrack))?;

        let signal = codec.signal();
        let mut input_eos = false;
        let mut idle_loops: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                info!("decode cancelled");
                return Ok(());
            }

            if let Some(request) = sink.poll_seek() {
                self.apply_seek(codec.as_mut(), demuxer, sink, request)?;
                input_eos = false;
                idle_loops = 0;
                continue;
            }

            let mut advanced = false;

            if !input_eos {
                match self.pump_input(demuxer, codec.as_mut(), &signal, track_index, sink, cancel)? {
                    Step::Idle => {}
                    Step::Progressed => advanced = true,
                    Step::Eos => {
                        debug!("input reached EOS");
                        input_eos = true;
                        advanced = true;
                    }
                    Step::Stopped => return Ok(()),
                }
            }

            match self.pump_output(codec.as_mut(), &signal, sink, cancel)? {
                Step::Idle => {}
                Step::Progressed => advanced = true,
                Step::Eos => {
                    self.emit_final_progress(sink);
                    info!("decode complete");
                    return Ok(());
                }
                Step::Stopped => {
                    info!("sink stopped the stream");
                    return Ok(());
                }
            }

            if advanced {
                idle_loops = 0;
            } else {
                idle_loops += 1;
                if idle_loops > MAX_IDLE_LOOPS {
                    return Err(CodecError::new(Stage::PopOutput, "decode loop stalled"));
                }
            }
        }
    }

    /// `audio/raw` containers: demuxer samples go straight to the sink, no
    /// decoder in the path.
    fn run_passthrough(
        &mut self,
        demuxer: &mut dyn PlatformDemuxer,
        track_index: u32,
        track: &TrackInfo,
        sink: &mut dyn StreamSink,
        cancel: &CancellationToken,
    ) -> CodecResult<()> {
        info!("audio/raw container, entering passthrough mode");

        // Raw containers carry authoritative parameters; caller overrides
        // only fill the gaps.
        let sample_rate = pick(track.sample_rate, self.options.sample_rate, DEFAULT_SAMPLE_RATE);
        let channel_count = pick(track.channel_count, self.options.channel_count, DEFAULT_CHANNELS);

        sink.on_ready(StreamInfo {
            sample_rate,
            channel_count,
            sample_format: self.options.sample_format,
            duration_ms: self.duration_ms,
        });

        demuxer
            .select_track(track_index)
            .map_err(|e| e.at(Stage::SelectTrack))?;

        let mut buf = SampleBuf::with_capacity(8192);
        let mut no_data: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                info!("decode cancelled (raw mode)");
                return Ok(());
            }

            if let Some(request) = sink.poll_seek() {
                let target = request.target_ms.max(0);
                match demuxer.seek_to_time(target * 1000) {
                    Ok(()) => {
                        debug!(target_ms = target, seq = request.seq, "raw seek applied");
                        sink.seek_applied(request.seq, true, target);
                    }
                    Err(e) => {
                        sink.seek_applied(request.seq, false, target);
                        return Err(e.at(Stage::Seek));
                    }
                }
                no_data = 0;
                continue;
            }

            match demuxer.read_sample(track_index, &mut buf) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    debug!(err = %e, "raw read finished");
                    break;
                }
            }

            let attr = buf.attr;
            if attr.size > 0 {
                no_data = 0;
            } else {
                no_data += 1;
                if no_data > MAX_NO_DATA_RETRIES {
                    return Err(CodecError::new(
                        Stage::PopOutput,
                        "stuck without data in raw passthrough",
                    ));
                }
            }

            self.report_progress(sink, attr.pts_us / 1000);

            if attr.size > 0 && !sink.on_pcm(buf.payload(), attr.pts_us) {
                info!("sink stopped the stream (raw mode)");
                return Ok(());
            }

            if attr.eos {
                break;
            }
        }

        self.emit_final_progress(sink);
        info!("raw passthrough complete");
        Ok(())
    }

    /// Move one demuxed sample into the codec, waiting up to [`BUFFER_WAIT`]
    /// for a free input buffer. Demuxer EOF becomes an empty EOS buffer.
    fn pump_input(
        &mut self,
        demuxer: &mut dyn PlatformDemuxer,
        codec: &mut dyn PlatformCodec,
        signal: &crate::CodecSignal,
        track_index: u32,
        sink: &mut dyn StreamSink,
        cancel: &CancellationToken,
    ) -> CodecResult<Step> {
        let ticket = match signal.input().wait_pop(BUFFER_WAIT, cancel) {
            WaitOutcome::Ticket(ticket) => ticket,
            WaitOutcome::TimedOut | WaitOutcome::Cancelled => return Ok(Step::Idle),
            WaitOutcome::Detached => {
                return Err(CodecError::new(Stage::PushInput, "codec destroyed"));
            }
        };

        let (attr, at_eof) = {
            let mut buf = ticket.buf.lock();
            match demuxer.read_sample(track_index, &mut buf) {
                Ok(true) => (buf.attr, false),
                Ok(false) => {
                    buf.set_eos();
                    (buf.attr, true)
                }
                Err(e) => {
                    // Demuxers report EOF as a read failure; treat it as EOS
                    // and let the codec drain.
                    warn!(err = %e, "read_sample failed, sending EOS");
                    buf.set_eos();
                    (buf.attr, true)
                }
            }
        };

        if !at_eof {
            self.report_progress(sink, attr.pts_us / 1000);
        }

        codec
            .push_input(ticket.index)
            .map_err(|e| e.at(Stage::PushInput))?;

        if at_eof || attr.eos {
            Ok(Step::Eos)
        } else {
            Ok(Step::Progressed)
        }
    }

    /// Deliver one decoded buffer to the sink and hand the slot back.
    fn pump_output(
        &mut self,
        codec: &mut dyn PlatformCodec,
        signal: &crate::CodecSignal,
        sink: &mut dyn StreamSink,
        cancel: &CancellationToken,
    ) -> CodecResult<Step> {
        let ticket = match signal.output().wait_pop(BUFFER_WAIT, cancel) {
            WaitOutcome::Ticket(ticket) => ticket,
            WaitOutcome::TimedOut | WaitOutcome::Cancelled => return Ok(Step::Idle),
            WaitOutcome::Detached => {
                return Err(CodecError::new(Stage::PopOutput, "codec destroyed"));
            }
        };

        let (attr, accepted) = {
            let buf = ticket.buf.lock();
            let attr = buf.attr;
            let accepted = if attr.size > 0 {
                sink.on_pcm(buf.payload(), attr.pts_us)
            } else {
                true
            };
            (attr, accepted)
        };

        codec
            .free_output(ticket.index)
            .map_err(|e| e.at(Stage::PopOutput))?;

        if !accepted {
            return Ok(Step::Stopped);
        }
        if attr.eos {
            Ok(Step::Eos)
        } else {
            Ok(Step::Progressed)
        }
    }

    /// Stop → flush → reseek the source → restart, then tell the sink.
    fn apply_seek(
        &mut self,
        codec: &mut dyn PlatformCodec,
        demuxer: &mut dyn PlatformDemuxer,
        sink: &mut dyn StreamSink,
        request: SeekRequest,
    ) -> CodecResult<()> {
        let target = request.target_ms.max(0);
        debug!(target_ms = target, seq = request.seq, "applying seek");

        let result = codec
            .stop()
            .and_then(|()| codec.flush())
            .and_then(|()| demuxer.seek_to_time(target * 1000))
            .and_then(|()| codec.start());

        match result {
            Ok(()) => {
                sink.seek_applied(request.seq, true, target);
                info!(target_ms = target, seq = request.seq, "seek applied");
                Ok(())
            }
            Err(e) => {
                warn!(err = %e, seq = request.seq, "seek failed");
                sink.seek_applied(request.seq, false, target);
                Err(e.at(Stage::Seek))
            }
        }
    }

    /// Progress throttling: integer-percent steps when the duration is
    /// known, ≥1 s PTS deltas otherwise.
    fn report_progress(&mut self, sink: &mut dyn StreamSink, pts_ms: i64) {
        if self.duration_ms > 0 && pts_ms >= 0 {
            let percent = ((pts_ms * 100) / self.duration_ms).clamp(0, 100) as i32;
            if percent != self.last_progress_percent {
                self.last_progress_percent = percent;
                sink.on_progress(f64::from(percent) / 100.0, pts_ms, self.duration_ms);
            }
        } else if pts_ms >= 0
            && (self.last_progress_pts_ms < 0 || pts_ms - self.last_progress_pts_ms >= 1000)
        {
            self.last_progress_pts_ms = pts_ms;
            sink.on_progress(-1.0, pts_ms, 0);
        }
    }

    fn emit_final_progress(&mut self, sink: &mut dyn StreamSink) {
        if self.duration_ms > 0 {
            sink.on_progress(1.0, self.duration_ms, self.duration_ms);
        } else {
            sink.on_progress(-1.0, self.last_progress_pts_ms.max(0), 0);
        }
    }
}

/// First positive value wins: `preferred`, then `detected`, then `fallback`.
fn pick<T: PartialOrd + Default>(preferred: T, detected: T, fallback: T) -> T {
    if preferred > T::default() {
        preferred
    } else if detected > T::default() {
        detected
    } else {
        fallback
    }
}
