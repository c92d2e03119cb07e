//! Host operations the pipeline needs from the running system.
//!
//! [`LinuxHost`] shells out to util-linux, parted, dosfstools, e2fsprogs and
//! qemu-img. Stages only ever talk to `dyn HostOps`, so the state machine can
//! be driven by a fake in tests.

use crate::error::ToolError;
use crate::preflight;
use crate::process::Cmd;
use std::path::{Path, PathBuf};

pub trait HostOps {
    /// Whether `tool` can be found on this host.
    fn has_tool(&self, tool: &str) -> bool;

    /// Whether the process may attach loop devices and mount filesystems.
    fn is_privileged(&self) -> bool;

    /// `losetup --find --partscan --show <backing>`, returning the device node.
    fn loop_attach(&self, backing: &Path) -> Result<PathBuf, ToolError>;

    fn loop_detach(&self, device: &Path) -> Result<(), ToolError>;

    /// Run `parted -s <device> <args...>`, returning its stdout.
    fn parted(&self, device: &Path, args: &[String]) -> Result<String, ToolError>;

    /// Wait for pending udev events (best-effort).
    fn settle(&self);

    fn node_exists(&self, node: &Path) -> bool;

    fn mkfs_fat32(&self, node: &Path, label: &str) -> Result<(), ToolError>;

    fn mkfs_ext4(&self, node: &Path, label: &str) -> Result<(), ToolError>;

    fn mount(&self, node: &Path, target: &Path) -> Result<(), ToolError>;

    fn unmount(&self, target: &Path) -> Result<(), ToolError>;

    /// `qemu-img convert -f <from> -O <to> <source> <target>`.
    fn convert_image(
        &self,
        source: &Path,
        source_format: &str,
        target: &Path,
        target_format: &str,
    ) -> Result<(), ToolError>;
}

/// The real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxHost;

impl LinuxHost {
    pub fn new() -> Self {
        Self
    }
}

impl HostOps for LinuxHost {
    fn has_tool(&self, tool: &str) -> bool {
        preflight::command_exists(tool)
    }

    fn is_privileged(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }

    fn loop_attach(&self, backing: &Path) -> Result<PathBuf, ToolError> {
        let result = Cmd::new("losetup")
            .args(["--find", "--partscan", "--show"])
            .arg_path(backing)
            .error_msg("Failed to attach loop device")
            .run()?;
        Ok(PathBuf::from(result.stdout.trim()))
    }

    fn loop_detach(&self, device: &Path) -> Result<(), ToolError> {
        Cmd::new("losetup")
            .arg("-d")
            .arg_path(device)
            .error_msg("Failed to detach loop device")
            .run()?;
        Ok(())
    }

    fn parted(&self, device: &Path, args: &[String]) -> Result<String, ToolError> {
        let result = Cmd::new("parted")
            .arg("-s")
            .arg_path(device)
            .args(args)
            .error_msg("parted failed")
            .run()?;
        Ok(result.stdout)
    }

    fn settle(&self) {
        let _ = Cmd::new("udevadm").arg("settle").allow_fail().run();
    }

    fn node_exists(&self, node: &Path) -> bool {
        node.exists()
    }

    fn mkfs_fat32(&self, node: &Path, label: &str) -> Result<(), ToolError> {
        Cmd::new("mkfs.fat")
            .args(["-F32", "-n", label])
            .arg_path(node)
            .error_msg("Failed to format EFI partition")
            .run()?;
        Ok(())
    }

    fn mkfs_ext4(&self, node: &Path, label: &str) -> Result<(), ToolError> {
        Cmd::new("mkfs.ext4")
            .args(["-F", "-L", label])
            .arg_path(node)
            .error_msg("Failed to format root partition")
            .run()?;
        Ok(())
    }

    fn mount(&self, node: &Path, target: &Path) -> Result<(), ToolError> {
        Cmd::new("mount")
            .arg_path(node)
            .arg_path(target)
            .error_msg("Failed to mount EFI partition")
            .run()?;
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), ToolError> {
        Cmd::new("umount")
            .arg_path(target)
            .error_msg("Failed to unmount EFI partition")
            .run()?;
        Ok(())
    }

    fn convert_image(
        &self,
        source: &Path,
        source_format: &str,
        target: &Path,
        target_format: &str,
    ) -> Result<(), ToolError> {
        Cmd::new("qemu-img")
            .args(["convert", "-f", source_format, "-O", target_format])
            .arg_path(source)
            .arg_path(target)
            .error_msg("qemu-img convert failed")
            .run()?;
        Ok(())
    }
}
