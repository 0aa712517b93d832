//! Protocol error types and error kinds.

use crate::command::Verb;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while framing, verifying or parsing a body.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame header: {0:?}")]
    InvalidHeader(Vec<u8>),

    #[error("frame body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("malformed body preamble")]
    MalformedPreamble,

    #[error("invalid UTF-8 in body")]
    InvalidUtf8,

    #[error("body carries no verb")]
    MissingVerb,

    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    #[error("bad arguments for {verb}: {reason}")]
    BadArguments { verb: Verb, reason: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Classifies the error by how the receiving side must react to it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::InvalidHeader(_) | ProtocolError::BodyTooLarge { .. } => {
                ErrorKind::Framing
            }
            ProtocolError::ChecksumMismatch { .. }
            | ProtocolError::MalformedPreamble
            | ProtocolError::InvalidUtf8 => ErrorKind::Checksum,
            ProtocolError::MissingVerb
            | ProtocolError::UnknownVerb(_)
            | ProtocolError::BadArguments { .. } => ErrorKind::Command,
            ProtocolError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Error classes of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or oversized length header. The stream can no longer be trusted.
    Framing,
    /// The body failed its integrity check. Only this frame is dropped.
    Checksum,
    /// Unknown verb or wrong argument shape. The command is ignored.
    Command,
    /// Transport failure.
    Io,
}

impl ErrorKind {
    /// Returns whether the connection that produced the error must be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Framing | ErrorKind::Io)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Framing => write!(f, "FRAMING"),
            ErrorKind::Checksum => write!(f, "CHECKSUM"),
            ErrorKind::Command => write!(f, "COMMAND"),
            ErrorKind::Io => write!(f, "IO"),
        }
    }
}
