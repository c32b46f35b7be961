//! Command-line interface definitions for the `sortie` binary.
//!
//! This module isolates the clap parser structures so the build script can
//! reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `sortie` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sortie",
    version,
    about = "Run a file of shell commands on a Scaleway instance over SSH",
    long_about = "Reuses the first running instance in the configured project, or \
                  creates one and waits for it, then runs each command from the \
                  command file in order over a single SSH connection and prints \
                  its output."
)]
pub(crate) struct Cli {
    /// File listing one command per line; blank lines and `#` comments are
    /// skipped. Overrides `command_file` from configuration.
    #[arg(long, value_name = "PATH")]
    pub(crate) commands: Option<String>,
    /// Run the remaining commands after one fails and exit non-zero at the
    /// end instead of stopping at the first failure.
    #[arg(long)]
    pub(crate) keep_going: bool,
    /// Log debug-level progress to stderr.
    #[arg(short, long)]
    pub(crate) verbose: bool,
    /// Emit progress as JSON lines.
    #[arg(long)]
    pub(crate) log_json: bool,
}
