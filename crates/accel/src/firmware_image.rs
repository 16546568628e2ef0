//! Accelerator firmware image
//!
//! The image the boot ROM receives over DFU. On the board it is linked into
//! the firmware; here it is either loaded from a file or supplied in memory.

use anyhow::{Context, Result, bail};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Name of the single-endpoint accelerator runtime image
pub const APEX_LATEST_SINGLE_EP: &str = "apex_latest_single_ep.bin";

/// Immutable, cheaply cloneable firmware bytes
#[derive(Clone)]
pub struct FirmwareImage {
    name: Arc<str>,
    data: Arc<[u8]>,
}

impl FirmwareImage {
    pub fn from_bytes(name: &str, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: Arc::from(name),
            data: data.into(),
        }
    }

    /// Read an image from disk
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("Failed to read firmware image: {}", path.display()))?;
        if data.is_empty() {
            bail!("Firmware image {} is empty", path.display());
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| APEX_LATEST_SINGLE_EP.to_string());
        Ok(Self::from_bytes(&name, data))
    }

    /// Placeholder runtime image for the simulated board
    ///
    /// The simulated boot ROM only checks that what it reads back matches
    /// what it was sent, so any deterministic content will do.
    pub fn placeholder(len: usize) -> Self {
        let data: Vec<u8> = (0..len)
            .map(|i| (i as u32).wrapping_mul(0x9e37_79b9).rotate_left(7) as u8)
            .collect();
        Self::from_bytes(APEX_LATEST_SINGLE_EP, data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// CRC32 of the image, for log lines
    pub fn checksum(&self) -> u32 {
        protocol::integrity::compute_checksum(&self.data)
    }
}

impl fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();

        let image = FirmwareImage::load(file.path()).unwrap();
        assert_eq!(image.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(image.len(), 4);
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(FirmwareImage::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        assert!(FirmwareImage::load(Path::new("/nonexistent/apex.bin")).is_err());
    }

    #[test]
    fn test_placeholder_is_deterministic() {
        let a = FirmwareImage::placeholder(1000);
        let b = FirmwareImage::placeholder(1000);
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.name(), APEX_LATEST_SINGLE_EP);
    }
}
