use std::fmt;

use thiserror::Error;

/// Pipeline stage an error originated from. Serialized as the `stage` field
/// of the error event, so the names are part of the wire contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Opening the FD/URI or reading the container format.
    Source,
    CreateDemuxer,
    /// No audio track or track metadata missing.
    Track,
    InitDecoder,
    Configure,
    Start,
    SelectTrack,
    PushInput,
    PopOutput,
    Seek,
    /// The decoder exited before ever reaching ready.
    Ready,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::CreateDemuxer => "create_demuxer",
            Self::Track => "track",
            Self::InitDecoder => "init_decoder",
            Self::Configure => "configure",
            Self::Start => "start",
            Self::SelectTrack => "select_track",
            Self::PushInput => "push_input",
            Self::PopOutput => "pop_output",
            Self::Seek => "seek",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal decode-session error: stage tag, numeric code, human message.
///
/// The first error wins for a session; it is delivered through the error
/// event and rejects every pending promise.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{stage} error (code {code}): {message}")]
pub struct CodecError {
    pub stage: Stage,
    pub code: i32,
    pub message: String,
}

impl CodecError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            code: -1,
            message: message.into(),
        }
    }

    pub fn with_code(stage: Stage, code: i32, message: impl Into<String>) -> Self {
        Self {
            stage,
            code,
            message: message.into(),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Error surface of the platform collaborators.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct PlatformError {
    pub code: i32,
    pub message: String,
}

impl PlatformError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            code: -1,
            message: message.into(),
        }
    }

    /// Attach the pipeline stage this failure surfaced in.
    #[must_use]
    pub fn at(self, stage: Stage) -> CodecError {
        CodecError {
            stage,
            code: self.code,
            message: self.message,
        }
    }
}
