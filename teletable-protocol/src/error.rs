//! Wire-level error types.

use crate::value::EntryType;
use thiserror::Error;

/// Errors produced while encoding or decoding the table protocol.
///
/// `Truncated` is the only recoverable kind: the reader keeps its buffer
/// and retries once more bytes arrive. Every other kind is fatal to the
/// connection that produced the bytes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    #[error("buffer ends mid-message")]
    Truncated,

    #[error("malformed {0}")]
    Malformed(&'static str),

    #[error("unrecognized entry type byte {0:#04x}")]
    InvalidType(u8),

    #[error("unrecognized message type byte {0:#04x}")]
    InvalidMessageType(u8),

    #[error("bad clear-all magic {0:#010x}")]
    InvalidMagic(u32),

    #[error("value does not match declared type {expected:?}")]
    TypeMismatch { expected: EntryType },

    #[error("no RPC definition stored under entry id {0}")]
    UnknownRpcDefinition(u16),

    #[error("RPC value count {actual} does not match arity {expected} of definition {definition}")]
    RpcArityMismatch {
        definition: u16,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported RPC definition version {0:#04x}")]
    UnsupportedRpcVersion(u8),
}

impl WireError {
    /// Returns whether the decoder can recover by waiting for more bytes.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WireError::Truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_truncation_is_recoverable() {
        assert!(WireError::Truncated.is_recoverable());
        assert!(!WireError::Malformed("varint").is_recoverable());
        assert!(!WireError::InvalidType(0x42).is_recoverable());
        assert!(!WireError::InvalidMagic(0).is_recoverable());
        assert!(!WireError::UnsupportedRpcVersion(2).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = WireError::InvalidMessageType(0x22);
        assert!(err.to_string().contains("0x22"));

        let err = WireError::RpcArityMismatch {
            definition: 9,
            expected: 2,
            actual: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains('9') && msg.contains('2') && msg.contains('3'));
    }
}
