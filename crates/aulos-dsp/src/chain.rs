//! Per-output-buffer DSP pipeline.
//!
//! Owned by the decode thread. Every decoded buffer flows through:
//! normalize to float → EQ → per-channel volume → DRC → tanh soft clip →
//! denormalize. When every stage is disabled the input bytes are returned
//! untouched so the bypassed path is byte-identical.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::trace;

use crate::{
    Compressor, DspParams, Equalizer, SampleFormat,
    format::{clamp_i16, clamp_i32},
};

/// Minimum interval between DRC meter emissions.
const METER_INTERVAL: Duration = Duration::from_millis(100);

const S16_NORM: f32 = 1.0 / 32768.0;
const S24_NORM: f32 = 1.0 / 8_388_608.0;
const S32_NORM: f32 = 1.0 / 2_147_483_648.0;

/// Compressor meter snapshot emitted at most once per 100 ms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrcMeter {
    pub level_db: f32,
    pub gain_db: f32,
    pub gr_db: f32,
}

/// The decode-thread side of the DSP state.
///
/// Reloads EQ/DRC configuration from the shared [`DspParams`] whenever its
/// version counters advance, so control-thread mutations never block audio.
pub struct DspChain {
    params: Arc<DspParams>,
    format: SampleFormat,
    channels: u16,
    eq: Equalizer,
    drc: Compressor,
    eq_seen_version: u32,
    drc_seen_version: u32,
    scratch_f: Vec<f32>,
    scratch_out: Vec<u8>,
    /// Monotonically non-decreasing |sample| maximum across the whole track.
    /// Keeps the S32 normalization stable when a codec emits S32 data at
    /// 16- or 24-bit effective scale.
    s32_max_abs: i64,
    meter_last_emit: Option<Instant>,
    emit: Option<Box<dyn Fn(DrcMeter) + Send>>,
}

impl DspChain {
    #[must_use]
    pub fn new(
        params: Arc<DspParams>,
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
    ) -> Self {
        Self {
            eq: Equalizer::new(sample_rate, channels),
            drc: Compressor::new(sample_rate, channels),
            params,
            format,
            channels,
            eq_seen_version: 0,
            drc_seen_version: 0,
            scratch_f: Vec::new(),
            scratch_out: Vec::new(),
            s32_max_abs: 0,
            meter_last_emit: None,
            emit: None,
        }
    }

    /// Install the meter sink.
    #[must_use]
    pub fn with_emit(mut self, emit: Box<dyn Fn(DrcMeter) + Send>) -> Self {
        self.emit = Some(emit);
        self
    }

    #[cfg(test)]
    fn s32_max_abs(&self) -> i64 {
        self.s32_max_abs
    }

    /// Run one decoded buffer through the pipeline.
    ///
    /// Returns the bytes to enqueue: `input` itself on the bypass path, an
    /// internal scratch buffer otherwise. A trailing partial frame passes
    /// through unprocessed.
    pub fn process<'a>(&'a mut self, input: &'a [u8]) -> &'a [u8] {
        let channels = self.channels as usize;
        let bps = self.format.bytes_per_sample();
        if input.is_empty() || (channels != 1 && channels != 2) {
            return input;
        }
        let sample_count = input.len() / bps;
        let frames = sample_count / channels;
        let processed = frames * channels;
        if processed == 0 {
            return input;
        }

        let eq_on = self.params.eq_enabled() && self.eq.is_ready();
        let (vol_l, vol_r) = self.params.channel_volumes();
        let vol_on = if channels == 1 {
            vol_l != 1.0
        } else {
            vol_l != 1.0 || vol_r != 1.0
        };
        let drc_on = self.params.drc_enabled() && self.drc.is_ready();

        if !eq_on && !vol_on && !drc_on {
            return input;
        }

        self.reload_eq(eq_on);
        self.reload_drc(drc_on);

        let denorm = self.normalize(input, processed);

        if eq_on {
            self.eq.process(&mut self.scratch_f);
        }

        if vol_on {
            if channels == 1 {
                for s in &mut self.scratch_f {
                    *s *= vol_l;
                }
            } else {
                for frame in self.scratch_f.chunks_exact_mut(2) {
                    frame[0] *= vol_l;
                    frame[1] *= vol_r;
                }
            }
        }

        if drc_on {
            self.drc.process(&mut self.scratch_f);
            self.maybe_emit_meter();
        }

        // Smooth saturation instead of a hard clip; keeps transient shape
        // and avoids block-level pumping.
        for s in &mut self.scratch_f {
            *s = s.tanh();
        }

        self.denormalize(input, processed, denorm);
        &self.scratch_out
    }

    fn reload_eq(&mut self, eq_on: bool) {
        if eq_on {
            let version = self.params.eq_version();
            if version != self.eq_seen_version {
                let gains = self.params.eq_gains_snapshot();
                self.eq.set_gains_stereo(&gains[0], &gains[1]);
                self.eq_seen_version = version;
                trace!(version, "eq config reloaded");
            }
        }
        self.eq.set_enabled(eq_on);
    }

    fn reload_drc(&mut self, drc_on: bool) {
        if drc_on {
            let version = self.params.drc_version();
            if version != self.drc_seen_version {
                self.drc.set_params(self.params.drc_snapshot());
                self.drc_seen_version = version;
                trace!(version, "drc config reloaded");
            }
        }
        self.drc.set_enabled(drc_on);
    }

    /// Fill `scratch_f` with the first `processed` samples scaled to ±1.
    /// Returns the denormalization factor.
    fn normalize(&mut self, input: &[u8], processed: usize) -> f32 {
        self.scratch_f.clear();
        self.scratch_f.reserve(processed);

        match self.format {
            SampleFormat::S16le => {
                for raw in input.chunks_exact(2).take(processed) {
                    let v = i16::from_le_bytes([raw[0], raw[1]]);
                    self.scratch_f.push(f32::from(v) * S16_NORM);
                }
                1.0 / S16_NORM
            }
            SampleFormat::S32le => {
                for raw in input.chunks_exact(4).take(processed) {
                    let v = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    self.s32_max_abs = self.s32_max_abs.max(i64::from(v).abs());
                }
                // Never shrinks mid-stream, so the perceived volume stays put.
                let norm = if self.s32_max_abs <= 1 << 20 {
                    S16_NORM
                } else if self.s32_max_abs <= 1 << 27 {
                    S24_NORM
                } else {
                    S32_NORM
                };
                for raw in input.chunks_exact(4).take(processed) {
                    let v = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    self.scratch_f.push(v as f32 * norm);
                }
                1.0 / norm
            }
        }
    }

    /// Write `scratch_f` back as integer PCM into `scratch_out`, copying any
    /// trailing partial frame verbatim from `input`.
    fn denormalize(&mut self, input: &[u8], processed: usize, denorm: f32) {
        self.scratch_out.clear();
        self.scratch_out.reserve(input.len());

        match self.format {
            SampleFormat::S16le => {
                for s in &self.scratch_f {
                    let v = clamp_i16(s * denorm);
                    self.scratch_out.extend_from_slice(&v.to_le_bytes());
                }
            }
            SampleFormat::S32le => {
                for s in &self.scratch_f {
                    let v = clamp_i32(f64::from(*s) * f64::from(denorm));
                    self.scratch_out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }

        let tail_start = processed * self.format.bytes_per_sample();
        self.scratch_out.extend_from_slice(&input[tail_start..]);
    }

    fn maybe_emit_meter(&mut self) {
        let Some(ref emit) = self.emit else {
            return;
        };
        let now = Instant::now();
        if self
            .meter_last_emit
            .is_some_and(|last| now.duration_since(last) < METER_INTERVAL)
        {
            return;
        }
        self.meter_last_emit = Some(now);
        emit(DrcMeter {
            level_db: self.drc.last_level_db(),
            gain_db: self.drc.last_gain_db(),
            gr_db: self.drc.last_gr_db(),
        });
    }
}
