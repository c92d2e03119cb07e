//! Bootable EFI disk image construction.
//!
//! Turns a compiled OS loader into a raw GPT disk image that UEFI firmware
//! boots from as removable media, and optionally wraps it in a virtual disk
//! container for a hypervisor.
//!
//! - **Image inputs** - [`ImageSpec`], [`Architecture`], [`TargetFormat`]
//! - **Disk pipeline** - allocation, loop device, GPT, mkfs, scoped mount,
//!   loader install, sequenced by [`disk::Pipeline`]
//! - **Conversion** - `qemu-img` wrapper with output format verification
//! - **Preflight checks** - privileges and host tools before any side effect
//!
//! # Image layout
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Protective MBR + primary GPT  (1 MiB)   │
//! ├──────────────────────────────────────────┤
//! │  ESP, FAT32 (efi_size_mib)               │
//! │  - /EFI/Boot/BOOTX64.EFI | BOOTAA64.EFI  │
//! ├──────────────────────────────────────────┤
//! │  Root, ext4 (remainder)                  │
//! ├──────────────────────────────────────────┤
//! │  Backup GPT                              │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use efi_disk_builder::{build_disk_image, Architecture, BuildOptions, ImageSpec};
//!
//! let spec = ImageSpec {
//!     image_path: "disk.img".into(),
//!     architecture: Architecture::X86_64,
//!     disk_size_mib: 512,
//!     efi_size_mib: 256,
//!     loader_path: "out/x86_64/bzImage".into(),
//!     target: None,
//! };
//! let report = build_disk_image(spec, BuildOptions::default())?;
//! println!("{}", report.image_path.display());
//! ```

pub mod config;
pub mod convert;
pub mod disk;
pub mod error;
pub mod host;
pub mod image;
pub mod loader;
pub mod preflight;
pub mod process;

#[cfg(test)]
pub(crate) mod testing;

pub use config::BuildConfig;
pub use disk::{build_disk_image, BuildOptions, BuildReport, Pipeline, Stage};
pub use error::{DiskError, PipelineError};
pub use image::{Architecture, ConversionTarget, ImageSpec, TargetFormat};
