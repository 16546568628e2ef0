//! Verified packages and the registry keyed by buffer address

use protocol::{Executable, ExecutableKind, ProtocolError, decode_package};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("malformed package: {0}")]
    Decode(#[from] ProtocolError),

    #[error("package has no inference executable")]
    NoInference,

    #[error("package has more than one inference executable")]
    DuplicateInference,

    #[error("package has more than one parameter-caching executable")]
    DuplicateParameterCaching,
}

/// Identity of a package: the address of its source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageKey(usize);

impl PackageKey {
    pub fn of(buffer: &[u8]) -> Self {
        Self(buffer.as_ptr() as usize)
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg@{:#x}", self.0)
    }
}

/// Immutable view of a verified package
///
/// Executables borrow the caller's buffer, which must outlive the process's
/// use of the accelerator.
#[derive(Debug, Clone)]
pub struct Package {
    key: PackageKey,
    inference: Executable<'static>,
    parameter_caching: Option<Executable<'static>>,
}

impl Package {
    /// Decode `buffer` and check its executable set
    pub fn verify(buffer: &'static [u8]) -> Result<Self, PackageError> {
        let view = decode_package(buffer)?;

        let mut inference = None;
        let mut parameter_caching = None;
        for exe in view.executables {
            let slot = if exe.kind.is_inference() {
                &mut inference
            } else {
                &mut parameter_caching
            };
            if slot.replace(exe).is_some() {
                return Err(match exe.kind {
                    ExecutableKind::ParameterCaching => PackageError::DuplicateParameterCaching,
                    _ => PackageError::DuplicateInference,
                });
            }
        }

        Ok(Self {
            key: PackageKey::of(buffer),
            inference: inference.ok_or(PackageError::NoInference)?,
            parameter_caching,
        })
    }

    pub fn key(&self) -> PackageKey {
        self.key
    }

    pub fn inference(&self) -> &Executable<'static> {
        &self.inference
    }

    pub fn parameter_caching(&self) -> Option<&Executable<'static>> {
        self.parameter_caching.as_ref()
    }
}

/// Packages registered so far, by buffer address
#[derive(Default)]
pub struct PackageRegistry {
    packages: HashMap<PackageKey, Arc<Package>>,
}

impl PackageRegistry {
    /// Return the package for `buffer`, verifying it on first sight
    pub fn register(&mut self, buffer: &'static [u8]) -> Result<Arc<Package>, PackageError> {
        let key = PackageKey::of(buffer);
        if let Some(package) = self.get(key) {
            debug!("{} already registered", key);
            return Ok(package);
        }

        let package = Arc::new(Package::verify(buffer).inspect_err(|e| {
            warn!("Rejected package at {}: {}", key, e);
        })?);
        info!(
            "Registered {} ({} bytes, {})",
            key,
            buffer.len(),
            if package.parameter_caching.is_some() {
                "with parameter caching"
            } else {
                "inference only"
            }
        );
        self.packages.insert(key, package.clone());
        Ok(package)
    }

    pub fn get(&self, key: PackageKey) -> Option<Arc<Package>> {
        self.packages.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
