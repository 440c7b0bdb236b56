#![forbid(unsafe_code)]

//! # Aulos
//!
//! Native core of a streaming audio player: demux + decode through a
//! platform codec, a real-time DSP pipeline (10-band EQ, compressor,
//! channel trim, soft clip), and a ring-buffered PCM feed for a pull-based
//! renderer, with sequence-ordered seeking.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use aulos::{DecoderOptions, StreamDecoder};
//!
//! let decoder = StreamDecoder::new(
//!     DecoderOptions::new("https://example.com/song.mp3"),
//!     backend, // platform MediaBackend implementation
//! );
//! let info = decoder.ready().await?;
//!
//! // Renderer pull loop
//! let mut buf = vec![0u8; 4096];
//! let n = decoder.fill(&mut buf);
//!
//! decoder.seek_to_async(30_000).await?;
//! decoder.close();
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod codec {
    pub use aulos_codec::*;
}

pub mod dsp {
    pub use aulos_dsp::*;
}

pub mod events {
    pub use aulos_events::*;
}

pub mod ring {
    pub use aulos_ring::*;
}

// ── Decoder facade ──────────────────────────────────────────────────────

mod capacity;
mod config;
mod decoder;
mod seek;

pub use aulos_codec::{CodecError, MediaBackend, SourceLocation, Stage, StreamInfo};
pub use aulos_dsp::{EQ_BANDS, SampleFormat};
pub use aulos_events::DecoderEvent;
pub use config::DecoderOptions;
pub use decoder::StreamDecoder;

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use aulos_codec::{CodecError, MediaBackend, SourceLocation, Stage, StreamInfo};
    pub use aulos_dsp::{EQ_BANDS, SampleFormat};
    pub use aulos_events::DecoderEvent;

    pub use crate::{DecoderOptions, StreamDecoder};
}
