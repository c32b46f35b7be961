//! Command file parsing and per-command results.
//!
//! A command file holds one shell command per line, executed in file order.
//! Blank lines and lines starting with `#` (after leading whitespace) are
//! skipped; every other line is sent to the remote shell verbatim.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::files;

/// One line of shell text to execute remotely.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandRequest(String);

impl CommandRequest {
    /// Wraps a command line.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    /// Returns the command text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Captured standard output of one command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandResult {
    /// Command that produced the output.
    pub command: CommandRequest,
    /// Full standard output, captured after the process terminated.
    pub output: String,
    /// Remote exit status, when the process got far enough to report one.
    pub exit_status: Option<i32>,
}

impl CommandResult {
    /// Returns `true` when the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_status, Some(0))
    }
}

/// Errors raised while loading a command file.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandFileError {
    /// The file could not be read.
    #[error("failed to read command file {path}: {message}")]
    Read {
        /// Path of the command file.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// The file contains no runnable command.
    #[error("command file {path} contains no commands")]
    Empty {
        /// Path of the command file.
        path: Utf8PathBuf,
    },
}

/// Splits command file text into ordered requests.
#[must_use]
pub fn parse_commands(text: &str) -> Vec<CommandRequest> {
    text.lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(CommandRequest::new)
        .collect()
}

/// Reads and parses the command file at `path`.
///
/// # Errors
///
/// Returns [`CommandFileError::Read`] when the file cannot be read and
/// [`CommandFileError::Empty`] when it yields no commands.
pub fn load_commands(path: &Utf8Path) -> Result<Vec<CommandRequest>, CommandFileError> {
    let text = files::read_to_string(path).map_err(|err| CommandFileError::Read {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let commands = parse_commands(&text);
    if commands.is_empty() {
        return Err(CommandFileError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(commands)
}
