//! `ssh2`-backed transport: TCP dial, handshake, key auth and exec.

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use ssh2::{ErrorCode, ExtendedData, Session};
use tracing::debug;

use super::Credential;
use super::transport::{Connection, DialError, ExecOutput};
use super::Dialer;

// libssh2 session error codes that mean the credential itself was refused.
const LIBSSH2_ERROR_FILE: i32 = -16;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

/// Dials instances with libssh2 and authenticates with in-memory key material.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ssh2Dialer;

/// Authenticated libssh2 session.
pub struct Ssh2Connection {
    session: Session,
}

impl Dialer for Ssh2Dialer {
    type Connection = Ssh2Connection;

    fn dial(
        &self,
        address: SocketAddr,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Self::Connection, DialError> {
        let tcp = TcpStream::connect_timeout(&address, timeout)
            .map_err(|err| DialError::Transport(format!("dial {address}: {err}")))?;
        let mut session = Session::new()
            .map_err(|err| DialError::Transport(format!("session setup: {err}")))?;
        session.set_timeout(timeout_millis(timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|err| DialError::Transport(format!("handshake with {address}: {err}")))?;
        debug!(%address, "ssh handshake complete");

        session
            .userauth_pubkey_memory(credential.user(), None, credential.private_key_pem(), None)
            .map_err(|err| classify_auth_failure(&err))?;
        if !session.authenticated() {
            return Err(DialError::Auth(format!(
                "public key for {} was not accepted",
                credential.user()
            )));
        }

        // Commands may legitimately run longer than the dial budget.
        session.set_timeout(0);
        Ok(Ssh2Connection { session })
    }
}

impl Connection for Ssh2Connection {
    fn exec(&mut self, command: &str) -> Result<ExecOutput, String> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|err| format!("failed to open session: {err}"))?;
        channel
            .handle_extended_data(ExtendedData::Ignore)
            .map_err(|err| format!("failed to configure session: {err}"))?;
        channel
            .exec(command)
            .map_err(|err| format!("failed to start command: {err}"))?;

        let mut raw = Vec::new();
        channel
            .read_to_end(&mut raw)
            .map_err(|err| format!("failed to read output: {err}"))?;
        channel
            .wait_close()
            .map_err(|err| format!("failed to close session: {err}"))?;
        let exit_status = channel
            .exit_status()
            .map_err(|err| format!("failed to read exit status: {err}"))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&raw).into_owned(),
            exit_status,
        })
    }

    fn close(&mut self) -> Result<(), String> {
        self.session
            .disconnect(None, "batch complete", None)
            .map_err(|err| err.to_string())
    }
}

fn classify_auth_failure(err: &ssh2::Error) -> DialError {
    match err.code() {
        ErrorCode::Session(
            LIBSSH2_ERROR_FILE
            | LIBSSH2_ERROR_AUTHENTICATION_FAILED
            | LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED,
        ) => DialError::Auth(err.to_string()),
        _ => DialError::Transport(format!("authentication interrupted: {err}")),
    }
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}
