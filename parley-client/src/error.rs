//! Client error types.

use parley_protocol::Verb;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] parley_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("reply timeout")]
    Timeout,

    #[error("unexpected reply to {0}")]
    UnexpectedReply(Verb),
}

impl ClientError {
    /// Returns whether reconnecting and retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::ProtocolError;

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());
        assert!(!ClientError::Protocol(ProtocolError::MissingVerb).is_retryable());
    }
}
