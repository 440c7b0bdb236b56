use aulos_dsp::SampleFormat;

/// Stream parameters reported once the demux probe and codec setup are done.
/// Immutable for the rest of the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub sample_format: SampleFormat,
    /// Total duration in ms, 0 when unknown (live/HTTP without length).
    pub duration_ms: i64,
}

impl StreamInfo {
    /// PCM bytes per second of playback for this stream.
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate)
            * u64::from(self.channel_count)
            * self.sample_format.bytes_per_sample() as u64
    }
}
