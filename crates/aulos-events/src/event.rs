use aulos_codec::{CodecError, StreamInfo};

/// Events a decode session publishes to the host binding.
#[derive(Clone, Debug)]
pub enum DecoderEvent {
    /// Stream parameters are known; playback may start.
    Ready(StreamInfo),
    /// Decode progress. `progress` is 0..=1, or −1 when the duration is
    /// unknown.
    Progress {
        progress: f64,
        pts_ms: i64,
        duration_ms: i64,
    },
    /// Terminal session error.
    Error(CodecError),
    /// A seek request finished. On failure the matching async completion
    /// carries the error; the event only reports the outcome.
    SeekComplete {
        seq: u64,
        success: bool,
        target_ms: i64,
    },
    /// Compressor meters, at most one per 100 ms.
    DrcMeter {
        level_db: f64,
        gain_db: f64,
        gr_db: f64,
    },
}
