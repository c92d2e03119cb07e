//! Error types for disk image construction.
//!
//! Every stage of the pipeline fails with its own [`DiskError`] variant so the
//! caller can tell which step broke. Failures of external tools carry a
//! [`ToolError`] with the command line and the tool's stderr, verbatim.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::disk::{Release, Stage};

/// Result type alias for disk image operations.
pub type Result<T> = std::result::Result<T, DiskError>;

/// An external command that could not be spawned or exited non-zero.
#[derive(Error, Debug)]
pub struct ToolError {
    /// What the step was trying to do, e.g. "Failed to create GPT".
    pub message: Option<String>,
    /// Rendered command line, e.g. `parted -s /dev/loop0 mklabel gpt`.
    pub command: String,
    /// Exit code, `None` if the process never ran or was killed by a signal.
    pub status: Option<i32>,
    /// Captured stderr (or the spawn error).
    pub stderr: String,
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            write!(f, "{}: ", message)?;
        }
        match self.status {
            Some(code) => write!(f, "`{}` exited with status {}", self.command, code)?,
            None => write!(f, "`{}` did not complete", self.command)?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {}", stderr)?;
        }
        Ok(())
    }
}

/// Errors raised while building a disk image.
#[derive(Error, Debug)]
pub enum DiskError {
    #[error("Invalid disk layout: {reason}")]
    Layout { reason: String },

    #[error("OS loader error: {reason}")]
    Loader { reason: String },

    #[error("Invalid configuration at {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("Missing required host tools: {}", list_missing(.missing))]
    MissingTool {
        /// (command, package) for every tool not found.
        missing: Vec<(String, String)>,
    },

    #[error("{operation} requires root privileges; re-run as root or via sudo")]
    Permission { operation: String },

    #[error("Failed to allocate disk image {path:?}: {reason}")]
    Allocation { path: PathBuf, reason: String },

    #[error("Failed to attach {backing:?} to a loop device: {source}")]
    DeviceAttach {
        backing: PathBuf,
        #[source]
        source: ToolError,
    },

    #[error("Partitioning {device:?} failed: {reason}")]
    Partition { device: PathBuf, reason: String },

    #[error("Formatting {node:?} failed: {reason}")]
    Format { node: PathBuf, reason: String },

    #[error("Failed to mount {node:?} on {target:?}: {reason}")]
    Mount {
        node: PathBuf,
        target: PathBuf,
        reason: String,
    },

    #[error("Failed to install OS loader to {path:?}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to unmount {target:?}: {reason}")]
    Unmount { target: PathBuf, reason: String },

    #[error("Failed to detach loop device {device:?}: {reason}")]
    Detach { device: PathBuf, reason: String },

    #[error("Conversion to {target:?} failed: {reason}")]
    Conversion { target: PathBuf, reason: String },
}

impl DiskError {
    /// Name of the error kind, as written to the log on failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Layout { .. } => "LayoutError",
            Self::Loader { .. } => "LoaderError",
            Self::Config { .. } => "ConfigError",
            Self::MissingTool { .. } => "MissingToolError",
            Self::Permission { .. } => "PermissionError",
            Self::Allocation { .. } => "AllocationError",
            Self::DeviceAttach { .. } => "DeviceAttachError",
            Self::Partition { .. } => "PartitionError",
            Self::Format { .. } => "FormatError",
            Self::Mount { .. } => "MountError",
            Self::Install { .. } => "InstallError",
            Self::Unmount { .. } => "UnmountError",
            Self::Detach { .. } => "DetachError",
            Self::Conversion { .. } => "ConversionError",
        }
    }

    /// Cleanup failures are logged; they never abort a build.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Unmount { .. } | Self::Detach { .. })
    }
}

fn list_missing(missing: &[(String, String)]) -> String {
    missing
        .iter()
        .map(|(tool, package)| format!("{} (install: {})", tool, package))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A pipeline run that ended in the `Failed` state.
///
/// `source` is the first failure. Errors hit while unwinding are kept in
/// `cleanup` for reporting and never replace it; `released` lists what the
/// unwind let go of, in order.
#[derive(Error, Debug)]
#[error("{stage} stage failed with {}: {source}", .source.kind())]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: DiskError,
    pub cleanup: Vec<DiskError>,
    pub released: Vec<Release>,
}
