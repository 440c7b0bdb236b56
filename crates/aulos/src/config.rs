//! Configuration for [`StreamDecoder`](crate::StreamDecoder).

use aulos_codec::{DriverOptions, SourceLocation};
use aulos_dsp::{EQ_BANDS, SampleFormat};

/// Options for creating a [`StreamDecoder`](crate::StreamDecoder).
///
/// Zero means "decide for me" everywhere: probed values for the stream
/// parameters, the adaptive heuristic for the ring size.
///
/// # Example
///
/// ```ignore
/// let options = DecoderOptions::new("/music/track.flac")
///     .with_sample_format(SampleFormat::S32le)
///     .with_eq_enabled(true)
///     .with_eq_gains([3.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0]);
/// ```
#[derive(Clone, Debug)]
pub struct DecoderOptions {
    /// Local path or `http(s)://` URI of the compressed source.
    pub source: String,
    /// Output sample rate override; 0 = use the probed rate.
    pub sample_rate: u32,
    /// Output channel count override; 0 = use the probed count.
    pub channel_count: u16,
    /// Bitrate hint for the codec; 0 = leave unset.
    pub bitrate: u32,
    /// Output PCM format.
    pub sample_format: SampleFormat,
    /// Fixed ring capacity in bytes; 0 = adaptive.
    pub ring_bytes: usize,
    /// Start with the equalizer enabled.
    pub eq_enabled: bool,
    /// Initial EQ gains in dB (both channels), clamped to ±24.
    pub eq_gains_db: Option<[f32; EQ_BANDS]>,
}

impl DecoderOptions {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sample_rate: 0,
            channel_count: 0,
            bitrate: 0,
            sample_format: SampleFormat::S16le,
            ring_bytes: 0,
            eq_enabled: false,
            eq_gains_db: None,
        }
    }

    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    #[must_use]
    pub fn with_channel_count(mut self, channel_count: u16) -> Self {
        self.channel_count = channel_count;
        self
    }

    #[must_use]
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    #[must_use]
    pub fn with_sample_format(mut self, format: SampleFormat) -> Self {
        self.sample_format = format;
        self
    }

    /// Pin the ring buffer size instead of the adaptive heuristic.
    #[must_use]
    pub fn with_ring_bytes(mut self, ring_bytes: usize) -> Self {
        self.ring_bytes = ring_bytes;
        self
    }

    #[must_use]
    pub fn with_eq_enabled(mut self, enabled: bool) -> Self {
        self.eq_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_eq_gains(mut self, gains_db: [f32; EQ_BANDS]) -> Self {
        self.eq_gains_db = Some(gains_db);
        self
    }

    pub(crate) fn location(&self) -> SourceLocation {
        SourceLocation::parse(&self.source)
    }

    pub(crate) fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
            bitrate: self.bitrate,
            sample_format: self.sample_format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_auto_everything() {
        let options = DecoderOptions::new("/a.mp3");
        assert_eq!(options.sample_rate, 0);
        assert_eq!(options.channel_count, 0);
        assert_eq!(options.ring_bytes, 0);
        assert_eq!(options.sample_format, SampleFormat::S16le);
        assert!(!options.eq_enabled);
        assert!(options.eq_gains_db.is_none());
    }

    #[test]
    fn http_source_is_remote() {
        assert!(DecoderOptions::new("https://cdn.example.com/a.mp3")
            .location()
            .is_remote());
        assert!(!DecoderOptions::new("/music/a.mp3").location().is_remote());
    }

    #[test]
    fn builders_pass_through() {
        let options = DecoderOptions::new("/a.flac")
            .with_sample_rate(48_000)
            .with_channel_count(2)
            .with_sample_format(SampleFormat::S32le)
            .with_ring_bytes(256 * 1024);
        let driver = options.driver_options();
        assert_eq!(driver.sample_rate, 48_000);
        assert_eq!(driver.channel_count, 2);
        assert_eq!(driver.sample_format, SampleFormat::S32le);
        assert_eq!(options.ring_bytes, 256 * 1024);
    }
}
