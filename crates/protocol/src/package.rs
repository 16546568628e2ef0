//! Accelerator package container
//!
//! A package is a postcard-encoded outer record wrapping a separately encoded
//! executable table:
//!
//! ```text
//! Container { magic: "APKG", version, table: bytes, checksum: crc32(table) }
//! ExecutableTable { executables: [Executable] }
//! Executable { kind, caching_token, instructions: bytes, parameters: bytes }
//! ```
//!
//! Decoding borrows every byte slice from the caller's buffer; nothing is
//! copied. The table checksum is verified before the table is decoded.

use crate::error::{ProtocolError, Result};
use crate::integrity::{IntegrityResult, compute_checksum};
use crate::version::{CURRENT_VERSION, PackageVersion};
use serde::{Deserialize, Serialize};

/// Leading bytes of every package
pub const PACKAGE_MAGIC: [u8; 4] = *b"APKG";

/// Role of an executable inside a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutableKind {
    /// Uploads parameters and runs inference in one go
    StandAlone,
    /// Uploads parameters into the device's parameter cache only
    ParameterCaching,
    /// Runs inference against parameters already resident on the device
    ExecutionOnly,
}

impl ExecutableKind {
    /// Stand-alone and execution-only executables both produce results.
    pub fn is_inference(&self) -> bool {
        matches!(
            self,
            ExecutableKind::StandAlone | ExecutableKind::ExecutionOnly
        )
    }
}

/// One compiled executable, borrowed from the package buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executable<'a> {
    pub kind: ExecutableKind,
    /// Executables sharing a token can share cached parameters
    pub caching_token: u64,
    #[serde(borrow)]
    pub instructions: &'a [u8],
    #[serde(borrow)]
    pub parameters: &'a [u8],
}

#[derive(Serialize, Deserialize)]
struct Container<'a> {
    magic: [u8; 4],
    version: PackageVersion,
    #[serde(borrow)]
    table: &'a [u8],
    checksum: u32,
}

#[derive(Serialize, Deserialize)]
struct ExecutableTable<'a> {
    #[serde(borrow)]
    executables: Vec<Executable<'a>>,
}

/// Decoded, checksum-verified package contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageView<'a> {
    pub version: PackageVersion,
    pub executables: Vec<Executable<'a>>,
}

/// Decode and verify a package buffer
///
/// Fails if the magic or version is wrong, the table checksum does not
/// match, either record is malformed, or either record leaves bytes unread.
pub fn decode_package(bytes: &[u8]) -> Result<PackageView<'_>> {
    let container: Container<'_> = take_all(bytes)?;

    if container.magic != PACKAGE_MAGIC {
        return Err(ProtocolError::BadMagic {
            found: container.magic,
        });
    }

    if !container.version.is_compatible_with(&CURRENT_VERSION) {
        return Err(ProtocolError::IncompatibleVersion {
            major: container.version.major,
            minor: container.version.minor,
            expected_major: CURRENT_VERSION.major,
            expected_minor: CURRENT_VERSION.minor,
        });
    }

    if let IntegrityResult::ChecksumMismatch { expected, computed } =
        IntegrityResult::check(container.table, container.checksum)
    {
        return Err(ProtocolError::ChecksumMismatch { expected, computed });
    }

    let table: ExecutableTable<'_> = take_all(container.table)?;

    Ok(PackageView {
        version: container.version,
        executables: table.executables,
    })
}

/// Encode executables into a package buffer
pub fn encode_package(executables: &[Executable<'_>]) -> Result<Vec<u8>> {
    let table = postcard::to_allocvec(&ExecutableTable {
        executables: executables.to_vec(),
    })?;

    let container = Container {
        magic: PACKAGE_MAGIC,
        version: CURRENT_VERSION,
        table: &table,
        checksum: compute_checksum(&table),
    };

    postcard::to_allocvec(&container).map_err(ProtocolError::from)
}

fn take_all<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    let (value, rest) = postcard::take_from_bytes::<T>(bytes)?;
    if !rest.is_empty() {
        return Err(ProtocolError::TrailingBytes { count: rest.len() });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exe(kind: ExecutableKind, token: u64) -> Executable<'static> {
        Executable {
            kind,
            caching_token: token,
            instructions: b"\x01\x02\x03",
            parameters: b"weights",
        }
    }

    #[test]
    fn test_decode_borrows_from_buffer() {
        let bytes = encode_package(&[
            exe(ExecutableKind::ParameterCaching, 7),
            exe(ExecutableKind::ExecutionOnly, 7),
        ])
        .unwrap();

        let view = decode_package(&bytes).unwrap();
        assert_eq!(view.version, CURRENT_VERSION);
        assert_eq!(view.executables.len(), 2);
        assert_eq!(view.executables[0].kind, ExecutableKind::ParameterCaching);
        assert_eq!(view.executables[1].caching_token, 7);

        let range = bytes.as_ptr_range();
        let params = view.executables[1].parameters.as_ptr();
        assert!(range.contains(&params));
    }

    #[test]
    fn test_detects_corrupted_table() {
        let mut bytes = encode_package(&[exe(ExecutableKind::StandAlone, 0)]).unwrap();
        // Flip a byte inside the table payload (after magic, version and length).
        let idx = bytes.len() / 2;
        bytes[idx] ^= 0x5a;

        assert!(decode_package(&bytes).is_err());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode_package(&[exe(ExecutableKind::StandAlone, 0)]).unwrap();
        bytes[0] = b'X';

        assert!(matches!(
            decode_package(&bytes),
            Err(ProtocolError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode_package(&[exe(ExecutableKind::StandAlone, 0)]).unwrap();
        bytes.push(0);

        assert!(matches!(
            decode_package(&bytes),
            Err(ProtocolError::TrailingBytes { count: 1 })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode_package(&[]).is_err());
        assert!(decode_package(b"not a package at all").is_err());
    }

    #[test]
    fn test_inference_kinds() {
        assert!(ExecutableKind::StandAlone.is_inference());
        assert!(ExecutableKind::ExecutionOnly.is_inference());
        assert!(!ExecutableKind::ParameterCaching.is_inference());
    }
}
