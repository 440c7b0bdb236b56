//! In-memory platform backend for tests.
//!
//! [`MockTrack`] carries deterministic PCM packets; the mock demuxer serves
//! them with real timestamps and supports time seeks, and [`MockCodec`] is
//! an identity decoder behind genuine bounded buffer queues, so driver
//! tests exercise the same choreography a hardware codec would (including
//! backpressure and EOS propagation). Failure injection covers runtime
//! output errors and seek failures.

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    error::PlatformError,
    platform::{
        CodecFormat, ContainerInfo, MediaBackend, PlatformCodec, PlatformDemuxer, PlatformSource,
        TrackInfo,
    },
    signal::{BufferAttr, BufferTicket, CodecSignal, SampleBuf},
};

const INPUT_SLOTS: u32 = 4;
const OUTPUT_SLOTS: u32 = 4;
/// Decoded packets the codec buffers internally before it stops handing
/// input slots back (backpressure).
const MAX_PENDING: usize = 16;

#[derive(Debug)]
struct MockFrame {
    pts_us: i64,
    data: Bytes,
}

/// A deterministic audio track: S16LE interleaved PCM where every sample of
/// frame `f` has the value `f & 0x7fff`, split into fixed-size packets.
/// The value↔index mapping lets tests translate delivered bytes back into
/// stream positions.
#[derive(Debug)]
pub struct MockTrack {
    mime: String,
    sample_rate: u32,
    channels: u16,
    duration_ms: i64,
    frames: Vec<MockFrame>,
}

impl MockTrack {
    /// Build a track of `total_frames` frames in packets of
    /// `frames_per_packet`.
    #[must_use]
    pub fn s16(
        mime: &str,
        sample_rate: u32,
        channels: u16,
        total_frames: usize,
        frames_per_packet: usize,
    ) -> Self {
        Self::generate(mime, sample_rate, channels, total_frames, frames_per_packet, |f| {
            (f & 0x7fff) as i16
        })
    }

    /// Like [`s16`](Self::s16) but with sample values below 1000, so DSP
    /// tests stay inside the soft clipper's linear region.
    #[must_use]
    pub fn s16_quiet(
        mime: &str,
        sample_rate: u32,
        channels: u16,
        total_frames: usize,
        frames_per_packet: usize,
    ) -> Self {
        Self::generate(mime, sample_rate, channels, total_frames, frames_per_packet, |f| {
            (f % 997) as i16
        })
    }

    /// A constant-|amplitude| waveform (alternating sign) for level-driven
    /// tests such as compressor steady-state checks.
    #[must_use]
    pub fn s16_constant(
        mime: &str,
        sample_rate: u32,
        channels: u16,
        total_frames: usize,
        frames_per_packet: usize,
        amplitude: i16,
    ) -> Self {
        Self::generate(mime, sample_rate, channels, total_frames, frames_per_packet, move |f| {
            if f % 2 == 0 { amplitude } else { -amplitude }
        })
    }

    fn generate(
        mime: &str,
        sample_rate: u32,
        channels: u16,
        total_frames: usize,
        frames_per_packet: usize,
        sample_at: impl Fn(usize) -> i16,
    ) -> Self {
        let mut frames = Vec::new();
        let mut frame_index = 0usize;
        while frame_index < total_frames {
            let count = frames_per_packet.min(total_frames - frame_index);
            let mut data = Vec::with_capacity(count * channels as usize * 2);
            for f in frame_index..frame_index + count {
                let v = sample_at(f);
                for _ in 0..channels {
                    data.extend_from_slice(&v.to_le_bytes());
                }
            }
            frames.push(MockFrame {
                pts_us: frame_index as i64 * 1_000_000 / i64::from(sample_rate),
                data: Bytes::from(data),
            });
            frame_index += count;
        }
        Self {
            mime: mime.to_owned(),
            sample_rate,
            channels,
            duration_ms: total_frames as i64 * 1000 / i64::from(sample_rate),
            frames,
        }
    }

    /// Pretend the container does not know its length (live stream).
    #[must_use]
    pub fn with_unknown_duration(mut self) -> Self {
        self.duration_ms = 0;
        self
    }

    /// All PCM bytes of the track in order (ground truth for FIFO checks).
    #[must_use]
    pub fn pcm_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for frame in &self.frames {
            out.extend_from_slice(&frame.data);
        }
        out
    }

    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }
}

/// Builder + [`MediaBackend`] implementation over one mock track.
pub struct MockBackend {
    track: Arc<MockTrack>,
    leading_mimes: Vec<String>,
    hide_audio: bool,
    fail_output_after: Option<usize>,
    fail_seek: bool,
}

impl MockBackend {
    #[must_use]
    pub fn new(track: MockTrack) -> Self {
        Self {
            track: Arc::new(track),
            leading_mimes: Vec::new(),
            hide_audio: false,
            fail_output_after: None,
            fail_seek: false,
        }
    }

    /// Insert a non-audio track before the audio track.
    #[must_use]
    pub fn with_leading_track(mut self, mime: &str) -> Self {
        self.leading_mimes.push(mime.to_owned());
        self
    }

    /// Report every track as non-audio.
    #[must_use]
    pub fn without_audio_track(mut self) -> Self {
        self.hide_audio = true;
        self
    }

    /// Fail the nth `free_output` call with a platform error.
    #[must_use]
    pub fn fail_output_after(mut self, n: usize) -> Self {
        self.fail_output_after = Some(n);
        self
    }

    /// Make every demuxer seek fail.
    #[must_use]
    pub fn fail_seek(mut self) -> Self {
        self.fail_seek = true;
        self
    }

    fn audio_track_index(&self) -> u32 {
        self.leading_mimes.len() as u32
    }
}

impl MediaBackend for MockBackend {
    fn open_path(
        &self,
        _path: &std::path::Path,
    ) -> Result<Arc<dyn PlatformSource>, PlatformError> {
        Ok(self.make_source())
    }

    fn open_uri(&self, _uri: &url::Url) -> Result<Arc<dyn PlatformSource>, PlatformError> {
        Ok(self.make_source())
    }

    fn create_demuxer(
        &self,
        _source: &Arc<dyn PlatformSource>,
    ) -> Result<Box<dyn PlatformDemuxer>, PlatformError> {
        Ok(Box::new(MockDemuxer {
            track: self.track.clone(),
            audio_index: self.audio_track_index(),
            selected: None,
            cursor: 0,
            fail_seek: self.fail_seek,
        }))
    }

    fn create_codec(&self, mime: &str) -> Result<Box<dyn PlatformCodec>, PlatformError> {
        if !mime.starts_with("audio") {
            return Err(PlatformError::failed(format!("no decoder for {mime}")));
        }
        Ok(Box::new(MockCodec::new(self.fail_output_after)))
    }
}

impl MockBackend {
    fn make_source(&self) -> Arc<dyn PlatformSource> {
        let mut tracks: Vec<TrackInfo> = self
            .leading_mimes
            .iter()
            .map(|mime| TrackInfo {
                mime: mime.clone(),
                sample_rate: 0,
                channel_count: 0,
            })
            .collect();
        tracks.push(TrackInfo {
            mime: if self.hide_audio {
                "application/octet-stream".to_owned()
            } else {
                self.track.mime.clone()
            },
            sample_rate: self.track.sample_rate,
            channel_count: self.track.channels,
        });

        Arc::new(MockSource {
            tracks,
            duration_ms: self.track.duration_ms,
        })
    }
}

struct MockSource {
    tracks: Vec<TrackInfo>,
    duration_ms: i64,
}

impl PlatformSource for MockSource {
    fn container_info(&self) -> Result<ContainerInfo, PlatformError> {
        Ok(ContainerInfo {
            track_count: self.tracks.len() as u32,
            duration_ms: self.duration_ms,
        })
    }

    fn track_info(&self, index: u32) -> Result<TrackInfo, PlatformError> {
        self.tracks
            .get(index as usize)
            .cloned()
            .ok_or_else(|| PlatformError::failed(format!("no track {index}")))
    }
}

struct MockDemuxer {
    track: Arc<MockTrack>,
    audio_index: u32,
    selected: Option<u32>,
    cursor: usize,
    fail_seek: bool,
}

impl PlatformDemuxer for MockDemuxer {
    fn select_track(&mut self, index: u32) -> Result<(), PlatformError> {
        if index != self.audio_index {
            return Err(PlatformError::failed(format!("cannot select track {index}")));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample(&mut self, index: u32, buf: &mut SampleBuf) -> Result<bool, PlatformError> {
        if self.selected != Some(index) {
            return Err(PlatformError::failed("track not selected"));
        }
        let Some(frame) = self.track.frames.get(self.cursor) else {
            return Ok(false);
        };
        buf.set_payload(&frame.data, frame.pts_us);
        self.cursor += 1;
        Ok(true)
    }

    fn seek_to_time(&mut self, position_us: i64) -> Result<(), PlatformError> {
        if self.fail_seek {
            return Err(PlatformError::failed("seek unsupported"));
        }
        // Land on the packet containing the target (keyframe-style rounding
        // toward the start).
        self.cursor = self
            .track
            .frames
            .iter()
            .rposition(|f| f.pts_us <= position_us.max(0))
            .unwrap_or(0);
        Ok(())
    }
}

#[derive(Default)]
struct CodecInner {
    configured: bool,
    prepared: bool,
    running: bool,
    started_once: bool,
    free_outputs: VecDeque<u32>,
    pending: VecDeque<(Vec<u8>, BufferAttr)>,
    held_inputs: VecDeque<u32>,
    outputs_freed: usize,
    fail_output_after: Option<usize>,
}

/// Identity "decoder": input packets come back out unchanged, through the
/// same announce/push/free slot protocol a platform codec uses.
pub struct MockCodec {
    signal: Arc<CodecSignal>,
    inputs: Vec<Arc<Mutex<SampleBuf>>>,
    outputs: Vec<Arc<Mutex<SampleBuf>>>,
    inner: Mutex<CodecInner>,
}

impl MockCodec {
    fn new(fail_output_after: Option<usize>) -> Self {
        Self {
            signal: Arc::new(CodecSignal::new()),
            inputs: (0..INPUT_SLOTS)
                .map(|_| Arc::new(Mutex::new(SampleBuf::with_capacity(4096))))
                .collect(),
            outputs: (0..OUTPUT_SLOTS)
                .map(|_| Arc::new(Mutex::new(SampleBuf::with_capacity(4096))))
                .collect(),
            inner: Mutex::new(CodecInner {
                fail_output_after,
                ..CodecInner::default()
            }),
        }
    }

    fn announce_input(&self, index: u32) {
        self.signal.input().push(BufferTicket {
            index,
            buf: self.inputs[index as usize].clone(),
        });
    }

    fn deliver_output(&self, index: u32, payload: &[u8], attr: BufferAttr) {
        {
            let mut slot = self.outputs[index as usize].lock();
            slot.data.clear();
            slot.data.extend_from_slice(payload);
            slot.attr = BufferAttr {
                size: payload.len(),
                ..attr
            };
        }
        self.signal.output().push(BufferTicket {
            index,
            buf: self.outputs[index as usize].clone(),
        });
    }
}

impl PlatformCodec for MockCodec {
    fn configure(&mut self, _format: &CodecFormat) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock();
        if inner.running {
            return Err(PlatformError::failed("configure while running"));
        }
        inner.configured = true;
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock();
        if !inner.configured {
            return Err(PlatformError::failed("prepare before configure"));
        }
        inner.prepared = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), PlatformError> {
        {
            let mut inner = self.inner.lock();
            if !inner.prepared {
                return Err(PlatformError::failed("start before prepare"));
            }
            inner.running = true;
            if !inner.started_once {
                inner.started_once = true;
                inner.free_outputs = (0..OUTPUT_SLOTS).collect();
            }
        }
        // Every start (initial and post-flush) re-announces the input slots.
        for index in 0..INPUT_SLOTS {
            self.announce_input(index);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        self.inner.lock().running = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock();
        if inner.running {
            return Err(PlatformError::failed("flush while running"));
        }
        self.signal.clear_all();
        inner.pending.clear();
        inner.held_inputs.clear();
        inner.free_outputs = (0..OUTPUT_SLOTS).collect();
        Ok(())
    }

    fn signal(&self) -> Arc<CodecSignal> {
        self.signal.clone()
    }

    fn push_input(&mut self, index: u32) -> Result<(), PlatformError> {
        let (payload, attr) = {
            let buf = self
                .inputs
                .get(index as usize)
                .ok_or_else(|| PlatformError::failed("bad input index"))?
                .lock();
            (buf.payload().to_vec(), buf.attr)
        };

        let mut inner = self.inner.lock();
        if !inner.running {
            return Err(PlatformError::failed("push_input while stopped"));
        }

        if let Some(slot) = inner.free_outputs.pop_front() {
            drop(inner);
            self.deliver_output(slot, &payload, attr);
            inner = self.inner.lock();
        } else {
            inner.pending.push_back((payload, attr));
        }

        if inner.pending.len() < MAX_PENDING {
            drop(inner);
            self.announce_input(index);
        } else {
            inner.held_inputs.push_back(index);
        }
        Ok(())
    }

    fn free_output(&mut self, index: u32) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock();
        if !inner.running {
            return Err(PlatformError::failed("free_output while stopped"));
        }

        inner.outputs_freed += 1;
        if inner
            .fail_output_after
            .is_some_and(|n| inner.outputs_freed > n)
        {
            return Err(PlatformError::failed("output buffer lost"));
        }

        if let Some((payload, attr)) = inner.pending.pop_front() {
            let held = inner.held_inputs.pop_front();
            drop(inner);
            self.deliver_output(index, &payload, attr);
            if let Some(held_index) = held {
                self.announce_input(held_index);
            }
        } else {
            inner.free_outputs.push_back(index);
        }
        Ok(())
    }
}

impl Drop for MockCodec {
    fn drop(&mut self) {
        // Pair queue lifetime with the codec: wake anything still waiting.
        self.signal.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::signal::WaitOutcome;

    fn format() -> CodecFormat {
        CodecFormat {
            sample_rate: 44_100,
            channel_count: 2,
            bitrate: 0,
            sample_format: aulos_dsp::SampleFormat::S16le,
        }
    }

    #[test]
    fn lifecycle_order_is_enforced() {
        let mut codec = MockCodec::new(None);
        assert!(codec.prepare().is_err());
        assert!(codec.start().is_err());

        codec.configure(&format()).unwrap();
        codec.prepare().unwrap();
        codec.start().unwrap();
        assert!(codec.configure(&format()).is_err(), "configure while running");
        assert!(codec.flush().is_err(), "flush while running");

        codec.stop().unwrap();
        codec.flush().unwrap();
        codec.start().unwrap();
    }

    #[test]
    fn start_announces_all_input_slots() {
        let mut codec = MockCodec::new(None);
        codec.configure(&format()).unwrap();
        codec.prepare().unwrap();
        codec.start().unwrap();
        assert_eq!(codec.signal().input().len(), INPUT_SLOTS as usize);
    }

    #[test]
    fn identity_decode_round_trip() {
        let mut codec = MockCodec::new(None);
        codec.configure(&format()).unwrap();
        codec.prepare().unwrap();
        codec.start().unwrap();

        let signal = codec.signal();
        let cancel = CancellationToken::new();
        let WaitOutcome::Ticket(ticket) = signal.input().wait_pop(Duration::from_millis(10), &cancel)
        else {
            panic!("no input ticket");
        };
        ticket.buf.lock().set_payload(&[1, 2, 3, 4], 99);
        codec.push_input(ticket.index).unwrap();

        let WaitOutcome::Ticket(out) = signal.output().wait_pop(Duration::from_millis(10), &cancel)
        else {
            panic!("no output ticket");
        };
        let buf = out.buf.lock();
        assert_eq!(buf.payload(), &[1, 2, 3, 4]);
        assert_eq!(buf.attr.pts_us, 99);
        assert!(!buf.attr.eos);
    }

    #[test]
    fn eos_input_propagates_to_output() {
        let mut codec = MockCodec::new(None);
        codec.configure(&format()).unwrap();
        codec.prepare().unwrap();
        codec.start().unwrap();

        let signal = codec.signal();
        let cancel = CancellationToken::new();
        let WaitOutcome::Ticket(ticket) = signal.input().wait_pop(Duration::from_millis(10), &cancel)
        else {
            panic!("no input ticket");
        };
        ticket.buf.lock().set_eos();
        codec.push_input(ticket.index).unwrap();

        let WaitOutcome::Ticket(out) = signal.output().wait_pop(Duration::from_millis(10), &cancel)
        else {
            panic!("no output ticket");
        };
        assert!(out.buf.lock().attr.eos);
    }

    #[test]
    fn drop_detaches_signal() {
        let codec = {
            let mut codec = MockCodec::new(None);
            codec.configure(&format()).unwrap();
            codec.prepare().unwrap();
            codec.start().unwrap();
            codec
        };
        let signal = codec.signal();
        drop(codec);

        let cancel = CancellationToken::new();
        assert!(matches!(
            signal.output().wait_pop(Duration::from_millis(1), &cancel),
            WaitOutcome::Detached
        ));
    }

    #[test]
    fn demuxer_seek_lands_on_containing_packet() {
        let backend = MockBackend::new(MockTrack::s16("audio/mpeg", 1_000, 1, 1_000, 100));
        let source = backend.make_source();
        let mut demuxer = backend.create_demuxer(&source).unwrap();
        demuxer.select_track(0).unwrap();

        demuxer.seek_to_time(250_000).unwrap();
        let mut buf = SampleBuf::default();
        assert!(demuxer.read_sample(0, &mut buf).unwrap());
        // 250 ms falls inside the packet starting at 200 ms.
        assert_eq!(buf.attr.pts_us, 200_000);
    }

    #[test]
    fn track_generator_encodes_frame_index() {
        let track = MockTrack::s16("audio/mpeg", 1_000, 2, 300, 128);
        let bytes = track.pcm_bytes();
        assert_eq!(bytes.len(), 300 * 2 * 2);
        // Frame 257, left channel.
        let offset = 257 * 4;
        let v = i16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
        assert_eq!(v, 257);
        assert_eq!(track.duration_ms(), 300);
    }
}
