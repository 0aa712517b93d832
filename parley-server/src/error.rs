//! Server error types.

use parley_protocol::ErrorKind;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] parley_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("no listen ports configured")]
    NoListeners,

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether the error ends the connection that raised it.
    pub fn is_fatal(&self) -> bool {
        match self {
            ServerError::Protocol(e) => e.kind().is_fatal(),
            _ => true,
        }
    }

    /// Returns the protocol error class, if this is a protocol error.
    pub fn protocol_kind(&self) -> Option<ErrorKind> {
        match self {
            ServerError::Protocol(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// Errors raised by room registry operations.
///
/// None of them is reported on the wire: the session logs them and the
/// command has no effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    UnknownParticipant(u64),

    #[error("connection {0} has no identity yet")]
    Unidentified(u64),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("nickname already taken: {0}")]
    NameConflict(String),
}
