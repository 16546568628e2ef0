//! Protocol error types

use thiserror::Error;

/// Descriptor and package decoding errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error from postcard
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Package does not start with the expected magic
    #[error("Bad package magic: {found:02x?}")]
    BadMagic { found: [u8; 4] },

    /// Package format version not understood by this build
    #[error(
        "Incompatible package version: {major}.{minor} (expected {expected_major}.{expected_minor})"
    )]
    IncompatibleVersion {
        major: u8,
        minor: u8,
        expected_major: u8,
        expected_minor: u8,
    },

    /// Executable table checksum does not match its contents
    #[error("Executable table checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// Decoded record did not consume the whole buffer
    #[error("Unexpected {count} trailing bytes")]
    TrailingBytes { count: usize },

    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Unknown bStatus value in a DFU status report
    #[error("Invalid DFU status code {0:#04x}")]
    InvalidDfuStatus(u8),

    /// Unknown bState value in a DFU status report
    #[error("Invalid DFU state {0:#04x}")]
    InvalidDfuState(u8),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::IncompatibleVersion {
            major: 2,
            minor: 0,
            expected_major: 1,
            expected_minor: 0,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Incompatible package version"));
        assert!(msg.contains("2.0"));
        assert!(msg.contains("1.0"));
    }

    #[test]
    fn test_checksum_error_display() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0xdeadbeef,
            computed: 0x1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("0xdeadbeef"));
        assert!(msg.contains("0x00000001"));
    }
}
