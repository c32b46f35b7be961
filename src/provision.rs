//! Instance acquisition: reuse a running instance or create and await one.
//!
//! [`Provisioner::acquire_instance`] is the only entry point callers need. It
//! never hands back a half-initialised instance: the returned
//! [`ReadyInstance`] is always `running` with a public address.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::{
    Backend, Instance, InstanceHandle, InstanceRequest, InstanceState, ReadyInstance,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(600);

/// Polling cadence and overall deadline for [`Provisioner::wait_until_running`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Delay between two state queries.
    pub poll_interval: Duration,
    /// Upper bound on the whole wait.
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Reasons discovery did not yield a running instance.
///
/// Both variants lead the provisioner down the creation path.
#[derive(Debug, Error)]
pub enum DiscoveryError<E>
where
    E: std::error::Error + 'static,
{
    /// The control plane reported no instance in the `running` state.
    #[error("no running instance found")]
    NoneRunning,
    /// Listing instances failed.
    #[error("failed to list instances: {0}")]
    Query(#[source] E),
}

/// Fatal failures while acquiring an instance.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    /// The control plane rejected the creation request. Never retried.
    #[error("failed to create instance: {0}")]
    Create(#[source] E),
    /// Querying an instance's state failed.
    #[error("failed to describe instance {instance_id}: {source}")]
    Describe {
        /// Provider instance identifier.
        instance_id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// The instance disappeared from the control plane while being awaited.
    #[error("instance {instance_id} is no longer known to the control plane")]
    Vanished {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// The instance reached a state from which it cannot become `running`.
    #[error("instance {instance_id} entered terminal state {state}")]
    Terminated {
        /// Provider instance identifier.
        instance_id: String,
        /// Last reported state.
        state: InstanceState,
    },
    /// The instance did not reach `running` before the deadline.
    #[error("instance {instance_id} not running after {}s (last state {state})", .waited.as_secs())]
    WaitTimeout {
        /// Provider instance identifier.
        instance_id: String,
        /// Time spent waiting.
        waited: Duration,
        /// Last reported state.
        state: InstanceState,
    },
    /// The instance is running but exposes no public address.
    #[error("instance {instance_id} is running without a public address")]
    MissingPublicIp {
        /// Provider instance identifier.
        instance_id: String,
    },
}

/// Yields exactly one running instance, creating it when necessary.
#[derive(Debug)]
pub struct Provisioner<B> {
    backend: B,
    request: InstanceRequest,
    wait: WaitPolicy,
}

impl<B> Provisioner<B>
where
    B: Backend,
{
    /// Creates a provisioner that creates instances from `request`.
    #[must_use]
    pub fn new(backend: B, request: InstanceRequest) -> Self {
        Self {
            backend,
            request,
            wait: WaitPolicy::default(),
        }
    }

    /// Overrides the readiness polling policy.
    #[must_use]
    pub const fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Returns the backend driving this provisioner.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the first instance, in control-plane order, whose state is
    /// `running`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoneRunning`] when no listed instance is
    /// running, or [`DiscoveryError::Query`] when listing fails.
    pub async fn find_running_instance(&self) -> Result<Instance, DiscoveryError<B::Error>> {
        let instances = self
            .backend
            .list_instances()
            .await
            .map_err(DiscoveryError::Query)?;
        debug!(count = instances.len(), "listed instances");
        first_running(instances).ok_or(DiscoveryError::NoneRunning)
    }

    /// Issues a single creation request using the fixed instance request.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Create`] when the control plane rejects the
    /// request.
    pub async fn create_instance(&self) -> Result<InstanceHandle, ProvisionError<B::Error>> {
        self.backend
            .create(&self.request)
            .await
            .map_err(ProvisionError::Create)
    }

    /// Polls until the instance reports `running` or the deadline passes.
    /// The last sleep is shortened so the wait never outlasts the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::WaitTimeout`] when the deadline passes,
    /// [`ProvisionError::Terminated`] when the instance can no longer start,
    /// [`ProvisionError::Vanished`] when it disappears, or
    /// [`ProvisionError::Describe`] when a state query fails.
    pub async fn wait_until_running(
        &self,
        handle: &InstanceHandle,
    ) -> Result<(), ProvisionError<B::Error>> {
        let started = Instant::now();
        let deadline = started + self.wait.timeout;
        let mut last_state = InstanceState::Pending;

        loop {
            let instance = self.describe(handle).await?;
            if instance.state.is_running() {
                return Ok(());
            }
            if instance.state.is_terminal() {
                return Err(ProvisionError::Terminated {
                    instance_id: handle.id.clone(),
                    state: instance.state,
                });
            }
            debug!(instance = %handle.id, state = %instance.state, "instance not running yet");
            last_state = instance.state;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sleep(self.wait.poll_interval.min(remaining)).await;
        }

        Err(ProvisionError::WaitTimeout {
            instance_id: handle.id.clone(),
            waited: started.elapsed(),
            state: last_state,
        })
    }

    /// Returns a running instance with a public address, reusing one when
    /// possible and otherwise creating one and waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] for any failure after discovery; discovery
    /// failures only select the creation path.
    pub async fn acquire_instance(&self) -> Result<ReadyInstance, ProvisionError<B::Error>> {
        info!("looking for a running instance");
        match self.find_running_instance().await {
            Ok(instance) => {
                info!(instance = %instance.id, "running instance found");
                return require_address(instance);
            }
            Err(DiscoveryError::NoneRunning) => {
                info!("no running instance found, creating one");
            }
            Err(err @ DiscoveryError::Query(_)) => {
                warn!(error = %err, "instance discovery failed, creating one");
            }
        }

        let handle = self.create_instance().await?;
        info!(instance = %handle.id, "created instance");

        info!(instance = %handle.id, "waiting for instance to be running");
        self.wait_until_running(&handle).await?;

        let instance = self.describe(&handle).await?;
        let ready = require_address(instance)?;
        info!(instance = %ready.id, address = %ready.public_ip, "instance ready");
        Ok(ready)
    }

    async fn describe(&self, handle: &InstanceHandle) -> Result<Instance, ProvisionError<B::Error>> {
        self.backend
            .describe(handle)
            .await
            .map_err(|source| ProvisionError::Describe {
                instance_id: handle.id.clone(),
                source,
            })?
            .ok_or_else(|| ProvisionError::Vanished {
                instance_id: handle.id.clone(),
            })
    }
}

fn first_running(instances: Vec<Instance>) -> Option<Instance> {
    instances
        .into_iter()
        .find(|instance| instance.state.is_running())
}

fn require_address<E>(instance: Instance) -> Result<ReadyInstance, ProvisionError<E>>
where
    E: std::error::Error + 'static,
{
    let instance_id = instance.id.clone();
    instance
        .into_ready()
        .ok_or(ProvisionError::MissingPublicIp { instance_id })
}
