#![forbid(unsafe_code)]

//! Decode-to-PCM orchestration against a platform audio codec.
//!
//! The platform demuxer and decoder are external collaborators modeled as
//! traits ([`PlatformSource`], [`PlatformDemuxer`], [`PlatformCodec`],
//! created through a [`MediaBackend`]). The codec announces buffer
//! availability asynchronously through [`CodecSignal`]; [`CodecDriver`]
//! pumps demuxed samples in and decoded PCM out, reporting to a
//! [`StreamSink`] owned by the caller.
//!
//! [`MockBackend`] is a fully in-memory backend used by the test suites of
//! this workspace.

pub use driver::{CodecDriver, DriverOptions, MAX_NO_DATA_RETRIES, SeekRequest, StreamSink};
pub use error::{CodecError, CodecResult, PlatformError, Stage};
pub use mock::{MockBackend, MockTrack};
pub use platform::{
    CodecFormat, ContainerInfo, MediaBackend, PlatformCodec, PlatformDemuxer, PlatformSource,
    SourceLocation, TrackInfo,
};
pub use signal::{BufferAttr, BufferQueue, BufferTicket, CodecSignal, SampleBuf, WaitOutcome};
pub use types::StreamInfo;

mod driver;
mod error;
pub mod mock;
mod platform;
mod signal;
mod types;
