//! Client error types.

use teletable_protocol::WireError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("not connected")]
    NotConnected,

    #[error("transport closed")]
    TransportClosed,

    #[error("session ended before completion")]
    Cancelled,

    #[error("timed out")]
    TimedOut,

    #[error("outbound queue full")]
    Backpressure,

    #[error("server speaks unsupported protocol revision {major}.{minor}")]
    UnsupportedProtocolVersion { major: u8, minor: u8 },
}

impl ClientError {
    /// Returns whether reconnecting can clear this error.
    ///
    /// A protocol-version rejection is permanent for the configured
    /// server; everything else may succeed on a fresh session.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClientError::UnsupportedProtocolVersion { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_rejection_is_permanent() {
        let err = ClientError::UnsupportedProtocolVersion { major: 2, minor: 0 };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("2.0"));

        assert!(ClientError::TransportClosed.is_retryable());
        assert!(ClientError::Wire(WireError::InvalidMagic(0)).is_retryable());
    }
}
