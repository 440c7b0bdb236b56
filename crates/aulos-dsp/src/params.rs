//! Lock-free shared DSP parameters.
//!
//! The control thread mutates, the decode thread snapshots. Every scalar is
//! a fixed-point integer atomic; a version counter per group tells the decode
//! thread when to rebuild coefficients. Gain changes therefore never block
//! the audio path and take effect at the next output buffer.

use std::{
    array,
    sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
};

use crate::drc::DrcParams;

/// Number of equalizer bands.
pub const EQ_BANDS: usize = 10;

const EQ_GAIN_LIMIT_DB: f32 = 24.0;

/// Shared, versioned DSP configuration.
///
/// Fixed-point scales: EQ gains dB×10, DRC threshold/attack/release/makeup
/// ×100, ratio ×1000, channel volumes ×1000.
#[derive(Debug)]
pub struct DspParams {
    eq_enabled: AtomicBool,
    eq_version: AtomicU32,
    /// `[channel][band]`, channel 0 = left/mono.
    eq_gains_db10: [[AtomicI32; EQ_BANDS]; 2],

    drc_enabled: AtomicBool,
    drc_version: AtomicU32,
    drc_threshold_db100: AtomicI32,
    drc_ratio_1000: AtomicI32,
    drc_attack_ms100: AtomicI32,
    drc_release_ms100: AtomicI32,
    drc_makeup_db100: AtomicI32,

    channel_vol_1000: [AtomicI32; 2],
}

impl Default for DspParams {
    fn default() -> Self {
        let defaults = DrcParams::default();
        Self {
            eq_enabled: AtomicBool::new(false),
            eq_version: AtomicU32::new(1),
            eq_gains_db10: array::from_fn(|_| array::from_fn(|_| AtomicI32::new(0))),
            drc_enabled: AtomicBool::new(false),
            drc_version: AtomicU32::new(1),
            drc_threshold_db100: AtomicI32::new((defaults.threshold_db * 100.0) as i32),
            drc_ratio_1000: AtomicI32::new((defaults.ratio * 1000.0) as i32),
            drc_attack_ms100: AtomicI32::new((defaults.attack_ms * 100.0) as i32),
            drc_release_ms100: AtomicI32::new((defaults.release_ms * 100.0) as i32),
            drc_makeup_db100: AtomicI32::new((defaults.makeup_db * 100.0) as i32),
            channel_vol_1000: array::from_fn(|_| AtomicI32::new(1000)),
        }
    }
}

impl DspParams {
    // -- EQ --------------------------------------------------------------

    pub fn eq_enabled(&self) -> bool {
        self.eq_enabled.load(Ordering::Relaxed)
    }

    pub fn set_eq_enabled(&self, enabled: bool) {
        self.eq_enabled.store(enabled, Ordering::Relaxed);
        self.bump_eq();
    }

    /// Set the same gains for both channels, clamped to ±24 dB.
    pub fn set_eq_gains(&self, gains_db: &[f32; EQ_BANDS]) {
        for (band, gain) in gains_db.iter().enumerate() {
            let g10 = Self::gain_db10(*gain);
            self.eq_gains_db10[0][band].store(g10, Ordering::Relaxed);
            self.eq_gains_db10[1][band].store(g10, Ordering::Relaxed);
        }
        self.bump_eq();
    }

    /// Set independent left/right gains, clamped to ±24 dB.
    pub fn set_eq_gains_lr(&self, left_db: &[f32; EQ_BANDS], right_db: &[f32; EQ_BANDS]) {
        for band in 0..EQ_BANDS {
            self.eq_gains_db10[0][band].store(Self::gain_db10(left_db[band]), Ordering::Relaxed);
            self.eq_gains_db10[1][band].store(Self::gain_db10(right_db[band]), Ordering::Relaxed);
        }
        self.bump_eq();
    }

    /// Snapshot of `[left, right]` gains in dB.
    pub fn eq_gains_snapshot(&self) -> [[f32; EQ_BANDS]; 2] {
        array::from_fn(|ch| {
            array::from_fn(|band| self.eq_gains_db10[ch][band].load(Ordering::Relaxed) as f32 / 10.0)
        })
    }

    pub fn eq_version(&self) -> u32 {
        self.eq_version.load(Ordering::Acquire)
    }

    fn bump_eq(&self) {
        self.eq_version.fetch_add(1, Ordering::Release);
    }

    fn gain_db10(gain_db: f32) -> i32 {
        (gain_db.clamp(-EQ_GAIN_LIMIT_DB, EQ_GAIN_LIMIT_DB) * 10.0).round() as i32
    }

    // -- DRC -------------------------------------------------------------

    pub fn drc_enabled(&self) -> bool {
        self.drc_enabled.load(Ordering::Relaxed)
    }

    pub fn set_drc_enabled(&self, enabled: bool) {
        self.drc_enabled.store(enabled, Ordering::Relaxed);
        self.bump_drc();
    }

    /// Store compressor parameters; each value is clamped to its legal range
    /// (see [`DrcParams::clamped`]).
    pub fn set_drc_params(
        &self,
        threshold_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
        makeup_db: f32,
    ) {
        let p = DrcParams {
            threshold_db,
            ratio,
            attack_ms,
            release_ms,
            makeup_db,
        }
        .clamped();

        self.drc_threshold_db100
            .store((p.threshold_db * 100.0).round() as i32, Ordering::Relaxed);
        self.drc_ratio_1000
            .store((p.ratio * 1000.0).round() as i32, Ordering::Relaxed);
        self.drc_attack_ms100
            .store((p.attack_ms * 100.0).round() as i32, Ordering::Relaxed);
        self.drc_release_ms100
            .store((p.release_ms * 100.0).round() as i32, Ordering::Relaxed);
        self.drc_makeup_db100
            .store((p.makeup_db * 100.0).round() as i32, Ordering::Relaxed);
        self.bump_drc();
    }

    pub fn drc_snapshot(&self) -> DrcParams {
        DrcParams {
            threshold_db: self.drc_threshold_db100.load(Ordering::Relaxed) as f32 / 100.0,
            ratio: self.drc_ratio_1000.load(Ordering::Relaxed) as f32 / 1000.0,
            attack_ms: self.drc_attack_ms100.load(Ordering::Relaxed) as f32 / 100.0,
            release_ms: self.drc_release_ms100.load(Ordering::Relaxed) as f32 / 100.0,
            makeup_db: self.drc_makeup_db100.load(Ordering::Relaxed) as f32 / 100.0,
        }
    }

    pub fn drc_version(&self) -> u32 {
        self.drc_version.load(Ordering::Acquire)
    }

    fn bump_drc(&self) {
        self.drc_version.fetch_add(1, Ordering::Release);
    }

    // -- Channel volumes -------------------------------------------------

    /// Per-channel volume scalars, clamped to `[0, 2]`.
    pub fn set_channel_volumes(&self, left: f32, right: f32) {
        self.channel_vol_1000[0].store((left.clamp(0.0, 2.0) * 1000.0).round() as i32, Ordering::Relaxed);
        self.channel_vol_1000[1].store((right.clamp(0.0, 2.0) * 1000.0).round() as i32, Ordering::Relaxed);
    }

    pub fn channel_volumes(&self) -> (f32, f32) {
        (
            self.channel_vol_1000[0].load(Ordering::Relaxed) as f32 / 1000.0,
            self.channel_vol_1000[1].load(Ordering::Relaxed) as f32 / 1000.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_gains_clamp_and_bump_version() {
        let params = DspParams::default();
        let v0 = params.eq_version();

        let mut gains = [0.0f32; EQ_BANDS];
        gains[0] = 100.0;
        gains[1] = -100.0;
        gains[2] = 3.5;
        params.set_eq_gains(&gains);

        let snap = params.eq_gains_snapshot();
        assert_eq!(snap[0][0], 24.0);
        assert_eq!(snap[0][1], -24.0);
        assert_eq!(snap[0][2], 3.5);
        assert_eq!(snap[0], snap[1]);
        assert!(params.eq_version() > v0);
    }

    #[test]
    fn eq_gains_lr_are_independent() {
        let params = DspParams::default();
        let left = [1.0f32; EQ_BANDS];
        let right = [-2.0f32; EQ_BANDS];
        params.set_eq_gains_lr(&left, &right);

        let snap = params.eq_gains_snapshot();
        assert_eq!(snap[0], [1.0; EQ_BANDS]);
        assert_eq!(snap[1], [-2.0; EQ_BANDS]);
    }

    #[test]
    fn drc_params_clamp_to_ranges() {
        let params = DspParams::default();
        params.set_drc_params(-200.0, 50.0, 0.0, 10_000.0, 100.0);

        let p = params.drc_snapshot();
        assert_eq!(p.threshold_db, -60.0);
        assert_eq!(p.ratio, 20.0);
        assert_eq!(p.attack_ms, 0.1);
        assert_eq!(p.release_ms, 2000.0);
        assert_eq!(p.makeup_db, 24.0);
    }

    #[test]
    fn drc_defaults_match_compressor_defaults() {
        let params = DspParams::default();
        let p = params.drc_snapshot();
        assert_eq!(p.threshold_db, -20.0);
        assert_eq!(p.ratio, 4.0);
        assert_eq!(p.attack_ms, 10.0);
        assert_eq!(p.release_ms, 100.0);
        assert_eq!(p.makeup_db, 0.0);
    }

    #[test]
    fn volumes_clamp() {
        let params = DspParams::default();
        assert_eq!(params.channel_volumes(), (1.0, 1.0));

        params.set_channel_volumes(-1.0, 5.0);
        assert_eq!(params.channel_volumes(), (0.0, 2.0));

        params.set_channel_volumes(0.5, 1.25);
        assert_eq!(params.channel_volumes(), (0.5, 1.25));
    }

    #[test]
    fn enable_toggles_bump_versions() {
        let params = DspParams::default();
        let eq0 = params.eq_version();
        let drc0 = params.drc_version();
        params.set_eq_enabled(true);
        params.set_drc_enabled(true);
        assert!(params.eq_version() > eq0);
        assert!(params.drc_version() > drc0);
        assert!(params.eq_enabled());
        assert!(params.drc_enabled());
    }
}
