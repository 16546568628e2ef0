//! Executable table integrity
//!
//! Packages carry a CRC32 over the serialized executable table so that a
//! truncated or bit-flipped buffer is rejected before any executable is
//! handed to the accelerator.

use crc32fast::Hasher;

/// Compute the CRC32 checksum of a byte slice
#[inline]
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Integrity verification result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityResult {
    /// Data passed integrity check
    Valid,
    /// Checksum mismatch - data is corrupted
    ChecksumMismatch { expected: u32, computed: u32 },
}

impl IntegrityResult {
    /// Check `data` against `expected`
    pub fn check(data: &[u8], expected: u32) -> Self {
        let computed = compute_checksum(data);
        if computed == expected {
            IntegrityResult::Valid
        } else {
            IntegrityResult::ChecksumMismatch { expected, computed }
        }
    }
}
