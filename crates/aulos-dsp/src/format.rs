use std::fmt;

/// Interleaved integer PCM formats carried through the pipeline.
///
/// Wire codes match the platform codec's sample-format enum: 1 = S16LE,
/// 3 = S32LE.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    #[default]
    S16le,
    S32le,
}

impl SampleFormat {
    /// Numeric wire code (1 = S16LE, 3 = S32LE).
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::S16le => 1,
            Self::S32le => 3,
        }
    }

    /// Map a wire code back to a format. Anything but 3 is treated as S16LE.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        if code == 3 { Self::S32le } else { Self::S16le }
    }

    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16le => 2,
            Self::S32le => 4,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S16le => "s16le",
            Self::S32le => "s32le",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Saturating f32 → i16 conversion.
pub(crate) fn clamp_i16(v: f32) -> i16 {
    if v > 32767.0 {
        32767
    } else if v < -32768.0 {
        -32768
    } else {
        v.round() as i16
    }
}

/// Saturating f64 → i32 conversion. The upper bound stays slightly below
/// `i32::MAX` so the float comparison cannot overflow on the cast.
pub(crate) fn clamp_i32(v: f64) -> i32 {
    if v >= 2_147_483_520.0 {
        i32::MAX
    } else if v <= -2_147_483_648.0 {
        i32::MIN
    } else {
        v.round() as i32
    }
}
