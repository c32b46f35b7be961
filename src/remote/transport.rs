//! Transport seam between the executor and the secure-shell library.
//!
//! The executor only needs to dial an authenticated connection and run
//! commands on it; keeping that behind [`Dialer`] and [`Connection`] lets tests
//! script refused dials and command outcomes without a network.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use super::Credential;

/// Failure to obtain an authenticated connection.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DialError {
    /// Transport-level failure (refused, unreachable, handshake aborted).
    /// Worth retrying while the remote daemon starts.
    #[error("{0}")]
    Transport(String),
    /// The remote side rejected the credential. Retrying cannot help.
    #[error("{0}")]
    Auth(String),
}

/// Output of one remote process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecOutput {
    /// Everything the process wrote to standard output.
    pub stdout: String,
    /// Exit status reported by the remote side.
    pub exit_status: i32,
}

/// Opens authenticated connections.
pub trait Dialer {
    /// Connection type produced by this dialer.
    type Connection: Connection;

    /// Dials `address`, bounding the attempt by `timeout`, and authenticates
    /// with `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`DialError::Transport`] for network or handshake failures and
    /// [`DialError::Auth`] when the credential is rejected.
    fn dial(
        &self,
        address: SocketAddr,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Self::Connection, DialError>;
}

/// An authenticated connection able to run commands one at a time.
pub trait Connection {
    /// Runs `command` in a fresh session and waits for it to terminate.
    ///
    /// A non-zero exit status is reported through [`ExecOutput`], not as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns a diagnostic when the session cannot be opened or the process
    /// output cannot be collected.
    fn exec(&mut self, command: &str) -> Result<ExecOutput, String>;

    /// Tears the connection down.
    ///
    /// # Errors
    ///
    /// Returns a diagnostic when the remote side could not be notified.
    fn close(&mut self) -> Result<(), String>;
}
