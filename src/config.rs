//! Optional TOML configuration for image builds.
//!
//! ```toml
//! disk_size_mib = 1024
//! efi_size_mib = 256
//! efi_label = "EFI"
//! root_label = "ROOT"
//! sparse = false
//! partition_timeout_ms = 5000
//! mount_prefix = "efi_mount_"
//! loader_search_dir = "out"
//! ```
//!
//! Every key is optional. Command-line flags override values from the file.

use crate::disk::allocate::Allocation;
use crate::disk::partitions::Labels;
use crate::error::{DiskError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DISK_SIZE_MIB: u64 = 512;
pub const DEFAULT_EFI_SIZE_MIB: u64 = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub disk_size_mib: u64,
    pub efi_size_mib: u64,
    pub efi_label: String,
    pub root_label: String,
    /// Create the backing file sparse instead of preallocating it.
    pub sparse: bool,
    /// How long to wait for partition nodes after writing the table.
    pub partition_timeout_ms: u64,
    pub mount_prefix: String,
    /// Where to look for a kernel image when no loader path is given.
    pub loader_search_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let labels = Labels::default();
        Self {
            disk_size_mib: DEFAULT_DISK_SIZE_MIB,
            efi_size_mib: DEFAULT_EFI_SIZE_MIB,
            efi_label: labels.efi,
            root_label: labels.root,
            sparse: false,
            partition_timeout_ms: 5000,
            mount_prefix: "efi_mount_".to_string(),
            loader_search_dir: PathBuf::from("out"),
        }
    }
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| DiskError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|reason| DiskError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let config: Self = toml::from_str(text).map_err(|e| e.to_string())?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> std::result::Result<(), String> {
        // mkfs.fat accepts at most 11 characters.
        if self.efi_label.is_empty() || self.efi_label.len() > 11 {
            return Err(format!(
                "efi_label '{}' must be 1 to 11 characters",
                self.efi_label
            ));
        }
        // ext4 labels are capped at 16 bytes.
        if self.root_label.is_empty() || self.root_label.len() > 16 {
            return Err(format!(
                "root_label '{}' must be 1 to 16 characters",
                self.root_label
            ));
        }
        if self.mount_prefix.contains('/') {
            return Err("mount_prefix must not contain '/'".to_string());
        }
        Ok(())
    }

    pub fn labels(&self) -> Labels {
        Labels {
            efi: self.efi_label.clone(),
            root: self.root_label.clone(),
        }
    }

    pub fn allocation(&self) -> Allocation {
        if self.sparse {
            Allocation::Sparse
        } else {
            Allocation::Preallocated
        }
    }

    pub fn partition_timeout(&self) -> Duration {
        Duration::from_millis(self.partition_timeout_ms)
    }
}
