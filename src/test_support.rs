//! Test support utilities shared across unit and integration tests.
//!
//! The scripted doubles replay queued responses in FIFO order so tests can
//! drive the provisioner and executor through refused dials, slow boots and
//! failing commands without a network or a cloud account.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::backend::{
    Backend, BackendFuture, Instance, InstanceHandle, InstanceRequest, InstanceState,
};
use crate::remote::{Connection, Credential, DialError, Dialer, ExecOutput};

/// Builds an instance record in the `fr-par-1` zone from a provider state tag.
#[must_use]
pub fn instance(id: &str, state: &str, public_ip: Option<IpAddr>) -> Instance {
    Instance {
        id: id.to_owned(),
        zone: String::from("fr-par-1"),
        state: InstanceState::from_tag(state),
        public_ip,
    }
}

/// Errors produced by [`ScriptedBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedBackendError {
    /// Scripted listing failure.
    #[error("list failure")]
    List,
    /// Scripted creation rejection.
    #[error("create failure")]
    Create,
    /// Scripted describe failure.
    #[error("describe failure")]
    Describe,
}

#[derive(Debug, Default)]
struct BackendState {
    listings: VecDeque<Vec<Instance>>,
    describes: VecDeque<Result<Option<Instance>, ScriptedBackendError>>,
    default_describe: Option<Instance>,
    fail_on_list: bool,
    fail_on_create: bool,
    fail_on_describe: bool,
    create_calls: u32,
    created: Vec<InstanceRequest>,
}

/// Control-plane double with scripted listings and describe responses.
///
/// Listings default to empty, describes fall back to the value set with
/// [`ScriptedBackend::set_default_describe`] (or `None`) once the queue is
/// drained, and every creation returns the handle `scripted-id`.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<BackendState>>,
}

impl ScriptedBackend {
    /// Creates a backend with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues the result of the next `list_instances` call.
    pub fn push_listing(&self, instances: Vec<Instance>) {
        self.state().listings.push_back(instances);
    }

    /// Queues the result of the next `describe` call.
    pub fn push_describe(&self, instance: Option<Instance>) {
        self.state().describes.push_back(Ok(instance));
    }

    /// Queues a failure for the next `describe` call.
    pub fn push_describe_failure(&self) {
        self.state()
            .describes
            .push_back(Err(ScriptedBackendError::Describe));
    }

    /// Sets the describe result returned once the queue is empty.
    pub fn set_default_describe(&self, instance: Option<Instance>) {
        self.state().default_describe = instance;
    }

    /// Makes every `list_instances` call fail.
    pub fn fail_on_list(&self) {
        self.state().fail_on_list = true;
    }

    /// Makes every `create` call fail.
    pub fn fail_on_create(&self) {
        self.state().fail_on_create = true;
    }

    /// Makes every `describe` call fail.
    pub fn fail_on_describe(&self) {
        self.state().fail_on_describe = true;
    }

    /// Number of creation requests received.
    #[must_use]
    pub fn create_calls(&self) -> u32 {
        self.state().create_calls
    }

    /// Requests received by `create`, in order.
    #[must_use]
    pub fn created_requests(&self) -> Vec<InstanceRequest> {
        self.state().created.clone()
    }
}

impl Backend for ScriptedBackend {
    type Error = ScriptedBackendError;

    fn list_instances(&self) -> BackendFuture<'_, Vec<Instance>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            if state.fail_on_list {
                return Err(ScriptedBackendError::List);
            }
            Ok(state.listings.pop_front().unwrap_or_default())
        })
    }

    fn describe<'a>(
        &'a self,
        _handle: &'a InstanceHandle,
    ) -> BackendFuture<'a, Option<Instance>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            if state.fail_on_describe {
                return Err(ScriptedBackendError::Describe);
            }
            let fallback = state.default_describe.clone();
            state.describes.pop_front().unwrap_or(Ok(fallback))
        })
    }

    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> BackendFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.create_calls += 1;
            state.created.push(request.clone());
            if state.fail_on_create {
                return Err(ScriptedBackendError::Create);
            }
            Ok(InstanceHandle {
                id: String::from("scripted-id"),
                zone: request.zone.clone(),
            })
        })
    }
}

/// Outcome of one scripted dial attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptedDial {
    /// Fail at the transport level with this message.
    Refuse(String),
    /// Reject the credential with this message.
    RejectKey(String),
    /// Hand back a connection.
    Accept,
}

#[derive(Debug, Default)]
struct DialerState {
    dials: VecDeque<ScriptedDial>,
    outputs: VecDeque<Result<ExecOutput, String>>,
    dial_calls: u32,
    close_calls: u32,
    executed: Vec<String>,
    addresses: Vec<SocketAddr>,
    users: Vec<String>,
}

/// SSH transport double. Dials accept once the scripted queue is drained;
/// commands pop scripted outputs and fail when none remain.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDialer {
    state: Arc<Mutex<DialerState>>,
}

/// Connection produced by [`ScriptedDialer`].
#[derive(Debug)]
pub struct ScriptedConnection {
    state: Arc<Mutex<DialerState>>,
}

fn lock_dialer(state: &Mutex<DialerState>) -> MutexGuard<'_, DialerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedDialer {
    /// Creates a dialer with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of the next dial.
    pub fn push_dial(&self, dial: ScriptedDial) {
        lock_dialer(&self.state).dials.push_back(dial);
    }

    /// Queues the output of the next command.
    pub fn push_output(&self, stdout: impl Into<String>, exit_status: i32) {
        lock_dialer(&self.state).outputs.push_back(Ok(ExecOutput {
            stdout: stdout.into(),
            exit_status,
        }));
    }

    /// Queues a session-level failure for the next command.
    pub fn push_exec_failure(&self, message: impl Into<String>) {
        lock_dialer(&self.state)
            .outputs
            .push_back(Err(message.into()));
    }

    /// Number of dial attempts made.
    #[must_use]
    pub fn dial_calls(&self) -> u32 {
        lock_dialer(&self.state).dial_calls
    }

    /// Number of connections closed.
    #[must_use]
    pub fn close_calls(&self) -> u32 {
        lock_dialer(&self.state).close_calls
    }

    /// Commands executed, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        lock_dialer(&self.state).executed.clone()
    }

    /// Addresses dialled, in order.
    #[must_use]
    pub fn addresses(&self) -> Vec<SocketAddr> {
        lock_dialer(&self.state).addresses.clone()
    }

    /// Login identities presented, in order.
    #[must_use]
    pub fn users(&self) -> Vec<String> {
        lock_dialer(&self.state).users.clone()
    }
}

impl Dialer for ScriptedDialer {
    type Connection = ScriptedConnection;

    fn dial(
        &self,
        address: SocketAddr,
        credential: &Credential,
        _timeout: Duration,
    ) -> Result<Self::Connection, DialError> {
        let mut state = lock_dialer(&self.state);
        state.dial_calls += 1;
        state.addresses.push(address);
        state.users.push(credential.user().to_owned());
        match state.dials.pop_front().unwrap_or(ScriptedDial::Accept) {
            ScriptedDial::Refuse(message) => Err(DialError::Transport(message)),
            ScriptedDial::RejectKey(message) => Err(DialError::Auth(message)),
            ScriptedDial::Accept => Ok(ScriptedConnection {
                state: Arc::clone(&self.state),
            }),
        }
    }
}

impl Connection for ScriptedConnection {
    fn exec(&mut self, command: &str) -> Result<ExecOutput, String> {
        let mut state = lock_dialer(&self.state);
        state.executed.push(command.to_owned());
        state
            .outputs
            .pop_front()
            .unwrap_or_else(|| Err(String::from("no scripted output available")))
    }

    fn close(&mut self) -> Result<(), String> {
        lock_dialer(&self.state).close_calls += 1;
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    /// A `None` value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
