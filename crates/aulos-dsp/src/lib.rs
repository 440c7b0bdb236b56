#![forbid(unsafe_code)]

//! Real-time DSP for the decode thread.
//!
//! - [`Equalizer`] - 10-band peaking EQ (biquad cascade, per-channel state)
//! - [`Compressor`] - feed-forward DRC with attack/release smoothing and metering
//! - [`DspChain`] - per-output-buffer pipeline: normalize → EQ → channel
//!   volumes → DRC → tanh soft clip → denormalize
//! - [`DspParams`] - lock-free shared parameters mutated from the control
//!   thread, snapshotted by the decode thread on version change
//!
//! All processing happens in the float domain; integer PCM enters and leaves
//! through the chain's normalization step.

pub use chain::{DrcMeter, DspChain};
pub use drc::{Compressor, DrcParams};
pub use eq::{BAND_FREQS_HZ, Equalizer};
pub use format::SampleFormat;
pub use params::{DspParams, EQ_BANDS};

mod chain;
mod drc;
mod eq;
mod format;
mod params;
