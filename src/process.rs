//! Thin builder over `std::process::Command` for host tools.
//!
//! Captures stdout/stderr so a failing tool's own message can be surfaced
//! verbatim in the returned [`ToolError`].

use crate::error::ToolError;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Captured output of a finished command.
#[derive(Debug)]
pub struct CommandResult {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Command builder.
///
/// ```rust,ignore
/// Cmd::new("losetup")
///     .args(["--find", "--partscan", "--show"])
///     .arg_path(&image)
///     .error_msg("Failed to attach loop device")
///     .run()?;
/// ```
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self
    }

    /// Message put in front of the tool's own error output.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the result instead of an error on non-zero exit.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Command line as it would be typed in a shell, for logs and errors.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    pub fn run(self) -> Result<CommandResult, ToolError> {
        let line = self.display();
        debug!(command = %line, "running");

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| ToolError {
                message: self.error_msg.clone(),
                command: line.clone(),
                status: None,
                stderr: e.to_string(),
            })?;

        let result = CommandResult {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() && !self.allow_fail {
            return Err(ToolError {
                message: self.error_msg,
                command: line,
                status: result.status,
                stderr: result.stderr,
            });
        }

        Ok(result)
    }
}
