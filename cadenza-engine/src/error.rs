//! Error types for the playback engine
//!
//! One `thiserror` enum covers the whole pipeline. Every variant maps
//! onto an [`ErrorKind`] so the status snapshot can report a coarse
//! classification alongside the message.

use serde::Serialize;
use thiserror::Error;

/// Coarse error classification exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Opening or reading an input stream failed.
    Input,
    /// The decoder could not make sense of the data.
    Decoder,
    /// A device open or play call failed.
    Output,
    /// Bad parameters.
    Config,
    /// The operation was preempted; never surfaced to clients.
    Canceled,
}

/// Main error type for the playback engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Input stream could not be opened.
    #[error("failed to open input {uri}: {message}")]
    InputOpen { uri: String, message: String },

    /// Input stream read failure.
    #[error("input read error: {0}")]
    InputRead(#[from] std::io::Error),

    /// No decoder plugin accepted the stream.
    #[error("no decoder found for {uri}")]
    NoDecoder { uri: String },

    /// The decoder hit malformed data or an unsupported feature.
    #[error("decode error in {uri}: {message}")]
    Decode { uri: String, message: String },

    /// The decoder could not seek and re-opening did not help.
    #[error("seek to {position_ms}ms failed: {message}")]
    SeekFailed { position_ms: u64, message: String },

    /// An output device failed to open.
    #[error("output '{name}' failed to open: {message}")]
    OutputOpen { name: String, message: String },

    /// An output device failed during playback.
    #[error("output '{name}' playback failure: {message}")]
    OutputPlay { name: String, message: String },

    /// Every configured output is failed or disabled.
    #[error("all audio outputs are unavailable")]
    AllOutputsFailed,

    /// Bad engine or output parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal preemption; unwinds state, never reported to clients.
    #[error("operation canceled")]
    Canceled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InputOpen { .. } | Error::InputRead(_) => ErrorKind::Input,
            Error::NoDecoder { .. } | Error::Decode { .. } | Error::SeekFailed { .. } => {
                ErrorKind::Decoder
            }
            Error::OutputOpen { .. } | Error::OutputPlay { .. } | Error::AllOutputsFailed => {
                ErrorKind::Output
            }
            Error::Config(_) => ErrorKind::Config,
            Error::Canceled => ErrorKind::Canceled,
        }
    }

    /// True for preemption errors that must not reach clients.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

/// Convenience Result type using the engine Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let e = Error::Decode { uri: "x.flac".into(), message: "bad frame".into() };
        assert_eq!(e.kind(), ErrorKind::Decoder);
        assert!(!e.is_canceled());
        assert!(Error::Canceled.is_canceled());
        assert_eq!(Error::Canceled.kind(), ErrorKind::Canceled);
    }
}
