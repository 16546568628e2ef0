//! Package format version management

use serde::{Deserialize, Serialize};

/// Package container format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub major: u8,
    pub minor: u8,
}

/// Format version written by this build
pub const CURRENT_VERSION: PackageVersion = PackageVersion { major: 1, minor: 0 };

impl PackageVersion {
    /// A reader understands any package with the same major version.
    pub fn is_compatible_with(&self, other: &PackageVersion) -> bool {
        self.major == other.major
    }
}
