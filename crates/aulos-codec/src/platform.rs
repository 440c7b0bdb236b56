//! Contracts of the platform media collaborators.
//!
//! The real demuxer and audio codec live outside this workspace; these
//! traits describe exactly what the driver needs from them. A codec is
//! expected to announce buffer availability asynchronously through the
//! [`CodecSignal`] it hands out, mirroring callback-based platform APIs.
//!
//! [`CodecSignal`]: crate::CodecSignal

use std::{path::PathBuf, sync::Arc};

use aulos_dsp::SampleFormat;
use url::Url;

use crate::{
    error::PlatformError,
    signal::{CodecSignal, SampleBuf},
};

/// Where the compressed audio comes from. Prefix-matched: `http://` and
/// `https://` select the remote path, anything else is a local file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote(Url),
}

impl SourceLocation {
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            if let Ok(url) = Url::parse(trimmed) {
                return Self::Remote(url);
            }
        }
        Self::Local(PathBuf::from(trimmed))
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Container-level metadata read right after the source opens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub track_count: u32,
    /// 0 when the container does not carry a duration.
    pub duration_ms: i64,
}

/// Per-track metadata. Fields the container does not know are 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackInfo {
    pub mime: String,
    pub sample_rate: u32,
    pub channel_count: u16,
}

/// Decoder configuration assembled from caller overrides and probed values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodecFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    /// 0 = leave unset.
    pub bitrate: u32,
    pub sample_format: SampleFormat,
}

/// An opened media source: container metadata access.
pub trait PlatformSource: Send + Sync {
    fn container_info(&self) -> Result<ContainerInfo, PlatformError>;
    fn track_info(&self, index: u32) -> Result<TrackInfo, PlatformError>;
}

/// Demuxer bound to one source.
pub trait PlatformDemuxer: Send {
    fn select_track(&mut self, index: u32) -> Result<(), PlatformError>;

    /// Read the next sample of the selected track into `buf`.
    ///
    /// Returns `Ok(false)` at end of stream. A sample with `attr.size == 0`
    /// is a transient empty read (raw passthrough sources do this).
    fn read_sample(&mut self, index: u32, buf: &mut SampleBuf) -> Result<bool, PlatformError>;

    /// Seek the source to `position_us`. May land on an earlier sync frame.
    fn seek_to_time(&mut self, position_us: i64) -> Result<(), PlatformError>;
}

/// The platform audio decoder.
///
/// Lifecycle: configure → prepare → start → (stop → flush → start)* → drop.
/// While running, free input buffers and filled output buffers are announced
/// on the [`CodecSignal`]; the driver answers with `push_input` /
/// `free_output` by slot index.
pub trait PlatformCodec: Send {
    fn configure(&mut self, format: &CodecFormat) -> Result<(), PlatformError>;
    fn prepare(&mut self) -> Result<(), PlatformError>;
    fn start(&mut self) -> Result<(), PlatformError>;
    fn stop(&mut self) -> Result<(), PlatformError>;
    fn flush(&mut self) -> Result<(), PlatformError>;

    /// The buffer-availability signal paired with this codec's lifetime.
    /// Implementations must detach it when the codec is destroyed so no
    /// waiter outlives the buffers.
    fn signal(&self) -> Arc<CodecSignal>;

    /// Submit the input buffer at `index` (previously announced) for decode.
    fn push_input(&mut self, index: u32) -> Result<(), PlatformError>;

    /// Return the output buffer at `index` to the codec.
    fn free_output(&mut self, index: u32) -> Result<(), PlatformError>;
}

/// Factory for the platform collaborators.
pub trait MediaBackend: Send + Sync {
    fn open_path(&self, path: &std::path::Path) -> Result<Arc<dyn PlatformSource>, PlatformError>;
    fn open_uri(&self, uri: &Url) -> Result<Arc<dyn PlatformSource>, PlatformError>;
    fn create_demuxer(
        &self,
        source: &Arc<dyn PlatformSource>,
    ) -> Result<Box<dyn PlatformDemuxer>, PlatformError>;
    fn create_codec(&self, mime: &str) -> Result<Box<dyn PlatformCodec>, PlatformError>;
}
