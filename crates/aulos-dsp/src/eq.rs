//! 10-band parametric equalizer using a biquad filter cascade.
//!
//! Each band is an RBJ peaking-EQ biquad per channel, applied in series with
//! direct-form-I state. Gain updates swap coefficients in place so filter
//! history survives and no click is introduced mid-stream.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type};

use crate::{
    format::{clamp_i16, clamp_i32},
    params::EQ_BANDS,
};

/// Band center frequencies in Hz.
pub const BAND_FREQS_HZ: [f32; EQ_BANDS] = [
    31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Graphic-EQ approximation; one octave-ish bandwidth.
const BAND_Q: f32 = 1.0;

/// Passthrough biquad coefficients (identity filter).
const PASSTHROUGH: Coefficients<f32> = Coefficients {
    a1: 0.0,
    a2: 0.0,
    b0: 1.0,
    b1: 0.0,
    b2: 0.0,
};

const S32_NORM: f32 = 1.0 / 2_147_483_648.0;

/// Peaking coefficients for one band.
///
/// A band whose center frequency would reach Nyquist collapses to the
/// identity filter, as does a band with (near-)zero gain.
fn peaking(sample_rate: u32, freq_hz: f32, gain_db: f32) -> Coefficients<f32> {
    if sample_rate == 0 || gain_db.abs() < 0.01 {
        return PASSTHROUGH;
    }
    let fs = sample_rate as f32;
    let nyquist = fs * 0.5;
    if freq_hz >= nyquist - 1.0 {
        return PASSTHROUGH;
    }
    let f0 = freq_hz.clamp(1.0, nyquist - 1.0);
    Coefficients::<f32>::from_params(Type::PeakingEQ(gain_db), fs.hz(), f0.hz(), BAND_Q)
        .unwrap_or(PASSTHROUGH)
}

/// 10-band peaking equalizer for interleaved mono/stereo PCM.
pub struct Equalizer {
    sample_rate: u32,
    channels: u16,
    ready: bool,
    enabled: bool,
    /// `[channel][band]` gains in dB, channel 0 = left/mono.
    gains_db: [[f32; EQ_BANDS]; 2],
    /// `[channel][band]` filter cascade.
    filters: [[DirectForm1<f32>; EQ_BANDS]; 2],
}

impl Equalizer {
    /// Create an equalizer for the given stream format. All gains start flat.
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            ready: sample_rate > 0 && (channels == 1 || channels == 2),
            enabled: false,
            gains_db: [[0.0; EQ_BANDS]; 2],
            filters: std::array::from_fn(|_| {
                std::array::from_fn(|_| DirectForm1::<f32>::new(PASSTHROUGH))
            }),
        }
    }

    /// Whether the stream format allows processing (valid rate, 1-2 channels).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Apply the same gains to both channels.
    pub fn set_gains(&mut self, gains_db: &[f32; EQ_BANDS]) {
        self.set_gains_stereo(gains_db, gains_db);
    }

    /// Apply independent left/right gains and rebuild coefficients.
    ///
    /// Coefficients are swapped under the running filters; history is kept so
    /// a live gain change does not click.
    pub fn set_gains_stereo(&mut self, left_db: &[f32; EQ_BANDS], right_db: &[f32; EQ_BANDS]) {
        self.gains_db[0] = *left_db;
        self.gains_db[1] = *right_db;
        for ch in 0..2 {
            for band in 0..EQ_BANDS {
                let coeffs = peaking(self.sample_rate, BAND_FREQS_HZ[band], self.gains_db[ch][band]);
                self.filters[ch][band].update_coefficients(coeffs);
            }
        }
    }

    /// Drop all filter history (e.g. when a stream restarts).
    pub fn reset(&mut self) {
        for ch in 0..2 {
            for band in 0..EQ_BANDS {
                let coeffs = peaking(self.sample_rate, BAND_FREQS_HZ[band], self.gains_db[ch][band]);
                self.filters[ch][band] = DirectForm1::<f32>::new(coeffs);
            }
        }
    }

    /// Process interleaved float samples in place.
    ///
    /// `samples.len()` must be a whole number of frames; anything else is
    /// truncated to the last complete frame.
    pub fn process(&mut self, samples: &mut [f32]) {
        if !self.ready || !self.enabled || samples.is_empty() {
            return;
        }

        let channels = self.channels as usize;
        for frame in samples.chunks_exact_mut(channels) {
            let mut left = frame[0];
            for filter in &mut self.filters[0] {
                left = filter.run(left);
            }
            frame[0] = left;

            if channels == 2 {
                let mut right = frame[1];
                for filter in &mut self.filters[1] {
                    right = filter.run(right);
                }
                frame[1] = right;
            }
        }
    }

    /// In-place S16LE entry point for callers outside the float pipeline.
    ///
    /// Biquads are linear, so S16 samples run at native scale.
    pub fn process_i16(&mut self, samples: &mut [i16]) {
        if !self.ready || !self.enabled || samples.is_empty() {
            return;
        }

        let channels = self.channels as usize;
        for frame in samples.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let mut x = f32::from(*sample);
                for filter in &mut self.filters[ch] {
                    x = filter.run(x);
                }
                *sample = clamp_i16(x);
            }
        }
    }

    /// In-place S32LE entry point. Samples are normalized to ±1 before the
    /// cascade to keep f32 precision.
    pub fn process_i32(&mut self, samples: &mut [i32]) {
        if !self.ready || !self.enabled || samples.is_empty() {
            return;
        }

        let channels = self.channels as usize;
        for frame in samples.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let mut x = *sample as f32 * S32_NORM;
                for filter in &mut self.filters[ch] {
                    x = filter.run(x);
                }
                *sample = clamp_i32(f64::from(x / S32_NORM));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, freq: f32, rate: f32, channels: usize) -> Vec<f32> {
        let mut pcm = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let s = (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * 0.5;
            for _ in 0..channels {
                pcm.push(s);
            }
        }
        pcm
    }

    #[test]
    fn flat_gains_are_bit_transparent() {
        let mut eq = Equalizer::new(44_100, 2);
        eq.set_enabled(true);
        eq.set_gains(&[0.0; EQ_BANDS]);

        let mut pcm = sine(1024, 1000.0, 44_100.0, 2);
        let reference = pcm.clone();
        eq.process(&mut pcm);
        assert_eq!(pcm, reference);
    }

    #[test]
    fn boost_changes_in_band_signal() {
        let mut eq = Equalizer::new(44_100, 2);
        eq.set_enabled(true);
        let mut gains = [0.0f32; EQ_BANDS];
        gains[5] = 6.0; // 1 kHz
        eq.set_gains(&gains);

        let mut pcm = sine(4096, 1000.0, 44_100.0, 2);
        let reference = pcm.clone();
        eq.process(&mut pcm);

        // Steady-state RMS should rise by roughly the band gain.
        let rms = |s: &[f32]| (s.iter().map(|x| x * x).sum::<f32>() / s.len() as f32).sqrt();
        let gain_db = 20.0 * (rms(&pcm[4096..]) / rms(&reference[4096..])).log10();
        assert!(gain_db > 4.0, "expected ~6 dB boost, got {gain_db:.2} dB");
    }

    #[test]
    fn disabled_is_a_no_op() {
        let mut eq = Equalizer::new(44_100, 2);
        let mut gains = [0.0f32; EQ_BANDS];
        gains[0] = 12.0;
        eq.set_gains(&gains);

        let mut pcm = sine(256, 100.0, 44_100.0, 2);
        let reference = pcm.clone();
        eq.process(&mut pcm);
        assert_eq!(pcm, reference);
    }

    #[test]
    fn invalid_layout_is_not_ready() {
        assert!(!Equalizer::new(0, 2).is_ready());
        assert!(!Equalizer::new(44_100, 6).is_ready());
        assert!(Equalizer::new(44_100, 1).is_ready());
    }

    #[test]
    fn near_nyquist_band_collapses_to_identity() {
        // At 24 kHz the Nyquist is 12 kHz; the 16 kHz band must drop out even
        // when boosted.
        let mut eq = Equalizer::new(24_000, 1);
        eq.set_enabled(true);
        let mut gains = [0.0f32; EQ_BANDS];
        gains[9] = 12.0; // 16 kHz
        eq.set_gains(&gains);

        let mut pcm = sine(512, 440.0, 24_000.0, 1);
        let reference = pcm.clone();
        eq.process(&mut pcm);
        assert_eq!(pcm, reference);
    }

    #[test]
    fn stereo_gains_act_per_channel() {
        let mut eq = Equalizer::new(44_100, 2);
        eq.set_enabled(true);
        let flat = [0.0f32; EQ_BANDS];
        let mut boosted = [0.0f32; EQ_BANDS];
        boosted[5] = 6.0;
        eq.set_gains_stereo(&flat, &boosted);

        let mut pcm = sine(4096, 1000.0, 44_100.0, 2);
        let reference = pcm.clone();
        eq.process(&mut pcm);

        let left: Vec<f32> = pcm.iter().step_by(2).copied().collect();
        let right: Vec<f32> = pcm.iter().skip(1).step_by(2).copied().collect();
        let ref_left: Vec<f32> = reference.iter().step_by(2).copied().collect();
        assert_eq!(left, ref_left, "flat left channel must pass through");
        assert_ne!(right, left, "boosted right channel must differ");
    }

    #[test]
    fn i16_entry_point_flat_is_identity() {
        let mut eq = Equalizer::new(44_100, 2);
        eq.set_enabled(true);
        eq.set_gains(&[0.0; EQ_BANDS]);

        let mut pcm: Vec<i16> = (0..512).map(|i| (i * 37 % 2000 - 1000) as i16).collect();
        let reference = pcm.clone();
        eq.process_i16(&mut pcm);
        assert_eq!(pcm, reference);
    }

    #[test]
    fn i32_entry_point_flat_is_near_identity() {
        let mut eq = Equalizer::new(44_100, 2);
        eq.set_enabled(true);
        eq.set_gains(&[0.0; EQ_BANDS]);

        let mut pcm: Vec<i32> = (0..512).map(|i| (i * 40_000 - 10_000_000)).collect();
        let reference = pcm.clone();
        eq.process_i32(&mut pcm);
        for (got, want) in pcm.iter().zip(&reference) {
            assert!((got - want).abs() <= 512, "got {got}, want {want}");
        }
    }

    #[test]
    fn gain_update_preserves_history() {
        let mut eq = Equalizer::new(44_100, 1);
        eq.set_enabled(true);
        let mut gains = [0.0f32; EQ_BANDS];
        gains[3] = 6.0;
        eq.set_gains(&gains);

        let mut pcm = sine(512, 250.0, 44_100.0, 1);
        eq.process(&mut pcm);

        // A mid-stream gain change must not reset the filters: the next
        // output sample continues the previous trajectory instead of
        // collapsing to b0·x for the zero-valued first input.
        gains[3] = 5.0;
        eq.set_gains(&gains);
        let mut tail = sine(64, 250.0, 44_100.0, 1);
        assert_eq!(tail[0], 0.0);
        eq.process(&mut tail);
        assert!(
            tail[0].abs() > 0.01,
            "carried filter history must keep the output continuous"
        );

        // reset() does drop the history: a zero input now yields zero.
        eq.reset();
        let mut silent = vec![0.0f32; 8];
        eq.process(&mut silent);
        assert_eq!(silent[0], 0.0);
    }
}
