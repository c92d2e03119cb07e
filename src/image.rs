//! Build inputs: target architecture, container formats and [`ImageSpec`].

use crate::disk::layout::PartitionLayout;
use crate::error::{DiskError, Result};
use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;

/// Architecture of the OS loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Architecture {
    #[value(name = "x86_64")]
    X86_64,
    #[value(name = "arm64", alias = "aarch64")]
    Arm64,
}

impl Architecture {
    /// Removable-media boot filename firmware looks for under `EFI/Boot/`.
    pub fn efi_boot_filename(&self) -> &'static str {
        match self {
            Self::X86_64 => "BOOTX64.EFI",
            Self::Arm64 => "BOOTAA64.EFI",
        }
    }

    /// Name of the kernel image the kernel build leaves for this architecture.
    pub fn kernel_image_name(&self) -> &'static str {
        match self {
            Self::X86_64 => "bzImage",
            Self::Arm64 => "Image",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86_64 => write!(f, "x86_64"),
            Self::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Virtual disk container formats understood by `qemu-img`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetFormat {
    Raw,
    Qcow2,
    Vmdk,
    Vdi,
    Vhdx,
    /// Legacy Virtual PC / Hyper-V VHD.
    Vpc,
}

impl TargetFormat {
    /// Format name as passed to `qemu-img -O`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Qcow2 => "qcow2",
            Self::Vmdk => "vmdk",
            Self::Vdi => "vdi",
            Self::Vhdx => "vhdx",
            Self::Vpc => "vpc",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Raw => "img",
            Self::Qcow2 => "qcow2",
            Self::Vmdk => "vmdk",
            Self::Vdi => "vdi",
            Self::Vhdx => "vhdx",
            Self::Vpc => "vhd",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to convert the finished raw image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTarget {
    pub path: PathBuf,
    pub format: TargetFormat,
}

/// Everything one pipeline run needs.
#[derive(Debug, Clone)]
pub struct ImageSpec {
    pub image_path: PathBuf,
    pub architecture: Architecture,
    pub disk_size_mib: u64,
    pub efi_size_mib: u64,
    pub loader_path: PathBuf,
    pub target: Option<ConversionTarget>,
}

impl ImageSpec {
    /// Check the spec without touching the host beyond `stat` calls.
    ///
    /// Returns the partition layout the spec describes.
    pub fn validate(&self) -> Result<PartitionLayout> {
        let layout = PartitionLayout::new(self.disk_size_mib, self.efi_size_mib)?;

        if !self.loader_path.is_file() {
            return Err(DiskError::Loader {
                reason: format!(
                    "{} does not exist or is not a regular file",
                    self.loader_path.display()
                ),
            });
        }

        if self.image_path.exists() {
            return Err(DiskError::Allocation {
                path: self.image_path.clone(),
                reason: "disk image already exists".to_string(),
            });
        }

        if let Some(target) = &self.target {
            if target.path == self.image_path {
                return Err(DiskError::Conversion {
                    target: target.path.clone(),
                    reason: "target image must differ from the raw image".to_string(),
                });
            }
        }

        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn spec_in(dir: &std::path::Path) -> ImageSpec {
        let loader = dir.join("bzImage");
        fs::write(&loader, b"MZ").unwrap();
        ImageSpec {
            image_path: dir.join("disk.img"),
            architecture: Architecture::X86_64,
            disk_size_mib: 512,
            efi_size_mib: 256,
            loader_path: loader,
            target: None,
        }
    }

    #[test]
    fn test_boot_filenames() {
        assert_eq!(Architecture::X86_64.efi_boot_filename(), "BOOTX64.EFI");
        assert_eq!(Architecture::Arm64.efi_boot_filename(), "BOOTAA64.EFI");
        assert_eq!(Architecture::X86_64.kernel_image_name(), "bzImage");
        assert_eq!(Architecture::Arm64.kernel_image_name(), "Image");
    }

    #[test]
    fn test_arch_parses_aarch64_alias() {
        assert_eq!(
            Architecture::from_str("aarch64", false).unwrap(),
            Architecture::Arm64
        );
        assert_eq!(Architecture::X86_64.to_string(), "x86_64");
    }

    #[test]
    fn test_target_format_names() {
        assert_eq!(TargetFormat::Vhdx.as_str(), "vhdx");
        assert_eq!(TargetFormat::Vpc.extension(), "vhd");
        assert_eq!(
            TargetFormat::from_str("qcow2", false).unwrap(),
            TargetFormat::Qcow2
        );
        assert!(TargetFormat::from_str("iso", false).is_err());
    }

    #[test]
    fn test_valid_spec() {
        let dir = tempfile::tempdir().unwrap();
        let layout = spec_in(dir.path()).validate().unwrap();
        assert_eq!(layout.efi().size_mib(), Some(256));
    }

    #[test]
    fn test_efi_larger_than_disk_is_layout_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec_in(dir.path());
        spec.efi_size_mib = 600;
        let err = spec.validate().unwrap_err();
        assert_eq!(err.kind(), "LayoutError");
    }

    #[test]
    fn test_out_of_range_sizes_are_layout_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec_in(dir.path());
        spec.efi_size_mib = u64::MAX;
        assert_eq!(spec.validate().unwrap_err().kind(), "LayoutError");

        spec.efi_size_mib = 256;
        spec.disk_size_mib = u64::MAX;
        assert_eq!(spec.validate().unwrap_err().kind(), "LayoutError");
        assert!(!spec.image_path.exists());
    }

    #[test]
    fn test_missing_loader() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec_in(dir.path());
        spec.loader_path = dir.path().join("nope");
        assert_eq!(spec.validate().unwrap_err().kind(), "LoaderError");
    }

    #[test]
    fn test_loader_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec_in(dir.path());
        spec.loader_path = dir.path().to_path_buf();
        assert_eq!(spec.validate().unwrap_err().kind(), "LoaderError");
    }

    #[test]
    fn test_existing_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec_in(dir.path());
        fs::write(&spec.image_path, b"").unwrap();
        assert_eq!(spec.validate().unwrap_err().kind(), "AllocationError");
    }

    #[test]
    fn test_target_equal_to_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec_in(dir.path());
        spec.target = Some(ConversionTarget {
            path: spec.image_path.clone(),
            format: TargetFormat::Raw,
        });
        assert_eq!(spec.validate().unwrap_err().kind(), "ConversionError");
    }
}
