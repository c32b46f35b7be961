//! Resilient remote execution over a secure-shell connection.
//!
//! [`RemoteExecutor::connect`] dials with a fixed-interval retry policy so a
//! freshly booted instance has time to start its SSH daemon. Transport
//! failures are retried; credential rejections are not. Commands then run one
//! at a time over the same connection, each in its own session.

mod credential;
mod ssh;
mod transport;

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::commands::{CommandRequest, CommandResult};

pub use credential::{Credential, CredentialError};
pub use ssh::{Ssh2Connection, Ssh2Dialer};
pub use transport::{Connection, DialError, Dialer, ExecOutput};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed-interval backoff governing connection attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total number of dial attempts, including the first.
    pub max_attempts: u32,
    /// Delay between a failed attempt and the next one.
    pub retry_interval: Duration,
    /// Upper bound on a single dial attempt.
    pub dial_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Checks that the policy allows at least one bounded attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidPolicy`] when `max_attempts` or
    /// `dial_timeout` is zero.
    pub fn validate(&self) -> Result<(), RemoteError> {
        if self.max_attempts == 0 {
            return Err(RemoteError::InvalidPolicy(String::from(
                "max_attempts must be at least 1",
            )));
        }
        if self.dial_timeout.is_zero() {
            return Err(RemoteError::InvalidPolicy(String::from(
                "dial_timeout must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// What a batch does when one command fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FailurePolicy {
    /// Stop at the first failing command.
    #[default]
    Abort,
    /// Record the failure and run the remaining commands.
    Continue,
}

/// Errors surfaced by the remote executor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Every dial attempt failed at the transport level.
    #[error("could not connect to {address} after {attempts} attempts: {last_error}")]
    ConnectTimeout {
        /// Address that was dialled.
        address: SocketAddr,
        /// Number of attempts made.
        attempts: u32,
        /// Transport error from the final attempt.
        last_error: String,
    },
    /// The remote side rejected the credential.
    #[error("authentication as {user} on {address} failed: {message}")]
    Auth {
        /// Address that was dialled.
        address: SocketAddr,
        /// Login identity presented.
        user: String,
        /// Diagnostic from the transport.
        message: String,
    },
    /// A command failed remotely or exited non-zero.
    #[error("command `{command}` failed: {message}")]
    Command {
        /// Command text.
        command: String,
        /// Exit status, when the remote process reported one.
        exit_status: Option<i32>,
        /// Standard output captured before the failure.
        output: String,
        /// Diagnostic from the transport or the exit status.
        message: String,
    },
    /// The retry policy cannot make a bounded attempt.
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
}

/// Owns a connection and closes it exactly once, on [`ConnectionGuard::close`]
/// or when dropped.
pub struct ConnectionGuard<C: Connection> {
    connection: Option<C>,
}

impl<C: Connection> ConnectionGuard<C> {
    /// Takes ownership of an open connection.
    #[must_use]
    pub const fn new(connection: C) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    /// Runs `command` on the guarded connection.
    ///
    /// # Errors
    ///
    /// Returns the transport diagnostic when the command cannot be run.
    pub fn exec(&mut self, command: &str) -> Result<ExecOutput, String> {
        match self.connection.as_mut() {
            Some(connection) => connection.exec(command),
            None => Err(String::from("connection already closed")),
        }
    }

    /// Closes the connection now rather than on drop.
    ///
    /// # Errors
    ///
    /// Returns the transport diagnostic when the close handshake fails; the
    /// connection is released either way.
    pub fn close(mut self) -> Result<(), String> {
        self.release()
    }

    fn release(&mut self) -> Result<(), String> {
        self.connection
            .take()
            .map_or(Ok(()), |mut connection| connection.close())
    }
}

impl<C: Connection> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!(error = %err, "connection close failed during drop");
        }
    }
}

/// Connects to an instance and runs commands on it.
#[derive(Debug)]
pub struct RemoteExecutor<D> {
    dialer: D,
    credential: Credential,
    policy: RetryPolicy,
    port: u16,
}

impl<D: Dialer> RemoteExecutor<D> {
    /// Creates an executor that dials port 22 with `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidPolicy`] when the policy is unusable.
    pub fn new(dialer: D, credential: Credential, policy: RetryPolicy) -> Result<Self, RemoteError> {
        policy.validate()?;
        Ok(Self {
            dialer,
            credential,
            policy,
            port: 22,
        })
    }

    /// Overrides the SSH port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Returns the port used when dialling an instance address.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Dials `address` until a connection is established, the credential is
    /// rejected, or the attempts run out.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Auth`] immediately on credential rejection and
    /// [`RemoteError::ConnectTimeout`] once every attempt has failed.
    pub fn connect(&self, address: SocketAddr) -> Result<ConnectionGuard<D::Connection>, RemoteError> {
        let max = self.policy.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max {
            info!(%address, attempt, max, "connecting");
            match self
                .dialer
                .dial(address, &self.credential, self.policy.dial_timeout)
            {
                Ok(connection) => {
                    info!(%address, attempt, "connected");
                    return Ok(ConnectionGuard::new(connection));
                }
                Err(DialError::Auth(message)) => {
                    return Err(RemoteError::Auth {
                        address,
                        user: self.credential.user().to_owned(),
                        message,
                    });
                }
                Err(DialError::Transport(message)) => {
                    if attempt < max {
                        warn!(
                            %address,
                            attempt,
                            max,
                            error = %message,
                            retry_in_secs = self.policy.retry_interval.as_secs_f64(),
                            "connection failed, trying again"
                        );
                        thread::sleep(self.policy.retry_interval);
                    } else {
                        warn!(%address, attempt, max, error = %message, "connection failed");
                    }
                    last_error = message;
                }
            }
        }

        Err(RemoteError::ConnectTimeout {
            address,
            attempts: max,
            last_error,
        })
    }

    /// Runs one command in a fresh session and captures its standard output.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Command`] when the session fails or the command
    /// exits non-zero.
    pub fn run(
        &self,
        connection: &mut ConnectionGuard<D::Connection>,
        command: &CommandRequest,
    ) -> Result<CommandResult, RemoteError> {
        let output = connection
            .exec(command.as_str())
            .map_err(|message| RemoteError::Command {
                command: command.to_string(),
                exit_status: None,
                output: String::new(),
                message,
            })?;

        if output.exit_status != 0 {
            return Err(RemoteError::Command {
                command: command.to_string(),
                exit_status: Some(output.exit_status),
                output: output.stdout,
                message: format!("exited with status {}", output.exit_status),
            });
        }

        Ok(CommandResult {
            command: command.clone(),
            output: output.stdout,
            exit_status: Some(output.exit_status),
        })
    }

    /// Releases the connection, logging rather than failing on close errors.
    pub fn close(&self, connection: ConnectionGuard<D::Connection>) {
        if let Err(err) = connection.close() {
            warn!(error = %err, "failed to close connection cleanly");
        }
    }

    /// Connects to `address` and runs `commands` in order over one
    /// connection, reporting each result through `on_result` as it completes.
    ///
    /// # Errors
    ///
    /// Returns connection errors from [`RemoteExecutor::connect`]. Under
    /// [`FailurePolicy::Abort`] the first [`RemoteError::Command`] stops the
    /// batch; under [`FailurePolicy::Continue`] failures are recorded as
    /// unsuccessful results instead.
    pub fn run_batch<F>(
        &self,
        address: SocketAddr,
        commands: &[CommandRequest],
        policy: FailurePolicy,
        mut on_result: F,
    ) -> Result<Vec<CommandResult>, RemoteError>
    where
        F: FnMut(&CommandResult),
    {
        let mut connection = self.connect(address)?;
        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            info!(command = %command, "running command");
            let result = match (self.run(&mut connection, command), policy) {
                (Ok(result), _) => result,
                (
                    Err(RemoteError::Command {
                        exit_status,
                        output,
                        message,
                        ..
                    }),
                    FailurePolicy::Continue,
                ) => {
                    warn!(command = %command, error = %message, "command failed, continuing");
                    CommandResult {
                        command: command.clone(),
                        output,
                        exit_status,
                    }
                }
                (Err(err), _) => return Err(err),
            };
            on_result(&result);
            results.push(result);
        }

        self.close(connection);
        Ok(results)
    }
}
