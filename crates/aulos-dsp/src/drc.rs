//! Feed-forward dynamic range compressor.
//!
//! Peak-detecting with linked stereo (one gain from `max(|L|, |R|)`),
//! one-pole attack/release smoothing, and block meters for the UI.

/// Compressor parameters. Construct freely, then pass through [`clamped`]
/// (or let [`Compressor::set_params`] clamp) before use.
///
/// [`clamped`]: DrcParams::clamped
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrcParams {
    /// Threshold above which compression engages, −60…0 dBFS.
    pub threshold_db: f32,
    /// Compression ratio, 1…20.
    pub ratio: f32,
    /// Attack time, 0.1…200 ms.
    pub attack_ms: f32,
    /// Release time, 5…2000 ms.
    pub release_ms: f32,
    /// Static makeup gain, −12…+24 dB.
    pub makeup_db: f32,
}

impl Default for DrcParams {
    fn default() -> Self {
        Self {
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            makeup_db: 0.0,
        }
    }
}

impl DrcParams {
    /// Clamp every field to its legal range.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            threshold_db: self.threshold_db.clamp(-60.0, 0.0),
            ratio: self.ratio.clamp(1.0, 20.0),
            attack_ms: self.attack_ms.clamp(0.1, 200.0),
            release_ms: self.release_ms.clamp(5.0, 2000.0),
            makeup_db: self.makeup_db.clamp(-12.0, 24.0),
        }
    }
}

fn db_to_lin(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn lin_to_db(lin: f32) -> f32 {
    20.0 * lin.max(1e-12).log10()
}

/// One-pole per-sample smoothing coefficient for a time constant in ms.
fn time_ms_to_coef(time_ms: f32, sample_rate: f32) -> f32 {
    if time_ms <= 0.0 || sample_rate <= 0.0 {
        return 0.0;
    }
    (-1.0 / (time_ms / 1000.0 * sample_rate)).exp()
}

/// Feed-forward compressor operating on interleaved float PCM.
pub struct Compressor {
    channels: u16,
    ready: bool,
    enabled: bool,
    params: DrcParams,
    sample_rate: f32,
    attack_coef: f32,
    release_coef: f32,
    current_gain: f32,
    last_level_db: f32,
    last_gain_db: f32,
    last_gr_db: f32,
}

impl Compressor {
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let params = DrcParams::default();
        let sr = sample_rate as f32;
        Self {
            channels,
            ready: sample_rate > 0 && (channels == 1 || channels == 2),
            enabled: false,
            params,
            sample_rate: sr,
            attack_coef: time_ms_to_coef(params.attack_ms, sr),
            release_coef: time_ms_to_coef(params.release_ms, sr),
            current_gain: 1.0,
            last_level_db: -120.0,
            last_gain_db: 0.0,
            last_gr_db: 0.0,
        }
    }

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

    pub fn set_params(&mut self, params: DrcParams) {
        self.params = params.clamped();
        self.attack_coef = time_ms_to_coef(self.params.attack_ms, self.sample_rate);
        self.release_coef = time_ms_to_coef(self.params.release_ms, self.sample_rate);
    }

    #[must_use]
    pub fn params(&self) -> DrcParams {
        self.params
    }

    /// Forget smoothing state and meters (stream restart).
    pub fn reset(&mut self) {
        self.current_gain = 1.0;
        self.last_level_db = -120.0;
        self.last_gain_db = 0.0;
        self.last_gr_db = 0.0;
    }

    /// Peak input level of the last processed block, dBFS.
    #[must_use]
    pub fn last_level_db(&self) -> f32 {
        self.last_level_db
    }

    /// Smoothed gain at the end of the last block, dB (includes makeup).
    #[must_use]
    pub fn last_gain_db(&self) -> f32 {
        self.last_gain_db
    }

    /// Gain reduction of the last block, dB, excluding makeup. Never negative.
    #[must_use]
    pub fn last_gr_db(&self) -> f32 {
        self.last_gr_db
    }

    /// Static gain target for one detector level (linear amplitude).
    fn target_gain(&self, level: f32) -> f32 {
        let in_db = lin_to_db(level);
        let mut gain_db = self.params.makeup_db;
        if in_db > self.params.threshold_db && self.params.ratio > 1.0 {
            let over = in_db - self.params.threshold_db;
            let out_db = self.params.threshold_db + over / self.params.ratio;
            gain_db += out_db - in_db;
        }
        db_to_lin(gain_db.clamp(-48.0, 24.0))
    }

    /// One-pole smoothing: falling gain uses the attack coefficient, rising
    /// gain the release coefficient.
    fn smooth_gain(&mut self, target: f32) -> f32 {
        let coef = if target < self.current_gain {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.current_gain = coef * self.current_gain + (1.0 - coef) * target;
        self.current_gain
    }

    /// Process interleaved float samples in place and update the meters.
    pub fn process(&mut self, samples: &mut [f32]) {
        if !self.ready || !self.enabled || samples.is_empty() {
            return;
        }

        let mut block_peak = 0.0f32;
        if self.channels == 1 {
            for sample in samples.iter_mut() {
                let level = sample.abs();
                block_peak = block_peak.max(level);
                let target = self.target_gain(level);
                let gain = self.smooth_gain(target);
                *sample *= gain;
            }
        } else {
            for frame in samples.chunks_exact_mut(2) {
                let level = frame[0].abs().max(frame[1].abs());
                block_peak = block_peak.max(level);
                let target = self.target_gain(level);
                let gain = self.smooth_gain(target);
                frame[0] *= gain;
                frame[1] *= gain;
            }
        }

        self.last_level_db = lin_to_db(block_peak);
        self.last_gain_db = lin_to_db(self.current_gain);
        self.last_gr_db = (self.params.makeup_db - self.last_gain_db).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Expected steady-state gain: makeup + (threshold − peak)·(1 − 1/ratio).
    fn steady_gain_db(p: &DrcParams, peak_db: f32) -> f32 {
        p.makeup_db + (p.threshold_db - peak_db) * (1.0 - 1.0 / p.ratio)
    }

    fn constant_block(level_db: f32, frames: usize, channels: usize) -> Vec<f32> {
        let amp = 10f32.powf(level_db / 20.0);
        let mut pcm = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            // Alternate sign so the block is a legal waveform, constant |x|.
            let s = if i % 2 == 0 { amp } else { -amp };
            for _ in 0..channels {
                pcm.push(s);
            }
        }
        pcm
    }

    #[test]
    fn steady_state_matches_gain_law() {
        let mut drc = Compressor::new(44_100, 2);
        drc.set_enabled(true);
        let params = DrcParams {
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            makeup_db: 0.0,
        };
        drc.set_params(params);

        // One second of constant −10 dBFS peak: far past the attack constant.
        let mut pcm = constant_block(-10.0, 44_100, 2);
        drc.process(&mut pcm);

        let expected = steady_gain_db(&params, -10.0); // −7.5 dB
        assert!(
            (drc.last_gain_db() - expected).abs() < 0.5,
            "gain {} expected {expected}",
            drc.last_gain_db()
        );
        assert!((drc.last_level_db() - (-10.0)).abs() < 0.1);
        assert!((drc.last_gr_db() - 7.5).abs() < 0.5);
    }

    #[test]
    fn below_threshold_is_unity_with_makeup() {
        let mut drc = Compressor::new(48_000, 2);
        drc.set_enabled(true);
        drc.set_params(DrcParams {
            makeup_db: 6.0,
            ..DrcParams::default()
        });

        let mut pcm = constant_block(-40.0, 48_000, 2);
        drc.process(&mut pcm);

        assert!((drc.last_gain_db() - 6.0).abs() < 0.3);
        assert_eq!(drc.last_gr_db(), 0.0);
    }

    #[test]
    fn gain_reduction_excludes_makeup() {
        let mut drc = Compressor::new(44_100, 2);
        drc.set_enabled(true);
        let params = DrcParams {
            makeup_db: 3.0,
            ..DrcParams::default()
        };
        drc.set_params(params);

        let mut pcm = constant_block(-10.0, 44_100, 2);
        drc.process(&mut pcm);

        // GR is the reduction relative to makeup, so it matches the no-makeup case.
        assert!((drc.last_gr_db() - 7.5).abs() < 0.5);
    }

    #[test]
    fn linked_stereo_uses_channel_peak() {
        let mut drc = Compressor::new(44_100, 2);
        drc.set_enabled(true);
        drc.set_params(DrcParams::default());

        // Left loud, right quiet; both get the same (left-driven) gain.
        let mut pcm = Vec::new();
        for _ in 0..44_100 {
            pcm.push(0.5);
            pcm.push(0.01);
        }
        drc.process(&mut pcm);

        let tail = &pcm[pcm.len() - 2..];
        let left_gain = tail[0] / 0.5;
        let right_gain = tail[1] / 0.01;
        assert!((left_gain - right_gain).abs() < 1e-3);
        assert!(left_gain < 1.0);
    }

    #[test]
    fn disabled_passes_through() {
        let mut drc = Compressor::new(44_100, 2);
        let mut pcm = constant_block(-3.0, 128, 2);
        let reference = pcm.clone();
        drc.process(&mut pcm);
        assert_eq!(pcm, reference);
    }

    #[test]
    fn unity_ratio_never_compresses() {
        let mut drc = Compressor::new(44_100, 1);
        drc.set_enabled(true);
        drc.set_params(DrcParams {
            ratio: 1.0,
            ..DrcParams::default()
        });

        let mut pcm = constant_block(-3.0, 4096, 1);
        let reference = pcm.clone();
        drc.process(&mut pcm);
        for (got, want) in pcm.iter().zip(&reference) {
            assert!((got - want).abs() < 1e-4);
        }
        assert_eq!(drc.last_gr_db(), 0.0);
    }

    #[test]
    fn attack_is_faster_than_release() {
        let mut drc = Compressor::new(44_100, 1);
        drc.set_enabled(true);
        drc.set_params(DrcParams {
            attack_ms: 1.0,
            release_ms: 500.0,
            ..DrcParams::default()
        });

        // Loud block drives the gain down fast.
        let mut loud = constant_block(-5.0, 4_410, 1); // 100 ms
        drc.process(&mut loud);
        let after_attack = drc.last_gain_db();
        assert!(after_attack < -5.0);

        // A quiet block of the same length barely recovers.
        let mut quiet = constant_block(-60.0, 4_410, 1);
        drc.process(&mut quiet);
        assert!(drc.last_gain_db() > after_attack);
        assert!(drc.last_gain_db() < -1.0, "release should still be in flight");
    }

    #[test]
    fn reset_restores_unity() {
        let mut drc = Compressor::new(44_100, 1);
        drc.set_enabled(true);
        drc.set_params(DrcParams::default());
        let mut pcm = constant_block(-5.0, 4096, 1);
        drc.process(&mut pcm);
        assert!(drc.last_gain_db() < 0.0);

        drc.reset();
        assert_eq!(drc.last_gain_db(), 0.0);
        assert_eq!(drc.last_level_db(), -120.0);
    }
}
