//! Preflight checks run before any side effect.
//!
//! A build needs root and a handful of host tools. Checking both up front
//! means a missing privilege or package fails with a clear error instead of
//! leaving a half-built image behind.
//!
//! # Example
//!
//! ```rust
//! use efi_disk_builder::host::LinuxHost;
//! use efi_disk_builder::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("parted") {
//!     println!("parted not installed");
//! }
//!
//! let tools = &[("mkfs.fat", "dosfstools"), ("mkfs.ext4", "e2fsprogs")];
//! if let Err(e) = check_required_tools(&LinuxHost::new(), tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use crate::error::{DiskError, Result};
use crate::host::HostOps;

/// Check if a command exists on the host system's PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools every build needs, as (command, package).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("losetup", "util-linux"),
    ("parted", "parted"),
    ("mkfs.fat", "dosfstools"),
    ("mkfs.ext4", "e2fsprogs"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
];

/// Needed only when converting to another container format.
pub const CONVERSION_TOOLS: &[(&str, &str)] = &[("qemu-img", "qemu-img")];

/// Check that specific tools are available.
///
/// # Returns
/// * `Ok(())` if all tools are found
/// * `Err` listing every missing tool with the package that provides it
pub fn check_required_tools(host: &dyn HostOps, tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<(String, String)> = tools
        .iter()
        .filter(|(tool, _)| !host.has_tool(tool))
        .map(|(tool, package)| (tool.to_string(), package.to_string()))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DiskError::MissingTool { missing })
    }
}

/// Check tools for a build, including `qemu-img` if `converting`.
pub fn check_host_tools(host: &dyn HostOps, converting: bool) -> Result<()> {
    if converting {
        let tools: Vec<_> = REQUIRED_TOOLS.iter().chain(CONVERSION_TOOLS).copied().collect();
        check_required_tools(host, &tools)
    } else {
        check_required_tools(host, REQUIRED_TOOLS)
    }
}

/// Fail with [`DiskError::Permission`] unless the process can attach loop
/// devices and mount.
pub fn check_privileges(host: &dyn HostOps) -> Result<()> {
    if host.is_privileged() {
        Ok(())
    } else {
        Err(DiskError::Permission {
            operation: "building a disk image".to_string(),
        })
    }
}
