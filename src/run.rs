//! Orchestrates end-to-end runs: acquire an instance, then execute the
//! command batch on it over SSH.
//!
//! Provisioning is async; the SSH session is blocking and runs on a
//! dedicated blocking thread so the runtime stays responsive.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::task;
use tracing::{info, warn};

use crate::backend::{Backend, ReadyInstance};
use crate::commands::{CommandRequest, CommandResult};
use crate::provision::{ProvisionError, Provisioner};
use crate::remote::{Dialer, FailurePolicy, RemoteError, RemoteExecutor};

/// Errors surfaced while performing a run.
#[derive(Debug, Error)]
pub enum RunError<E>
where
    E: std::error::Error + 'static,
{
    /// No running instance could be obtained.
    #[error(transparent)]
    Provision(#[from] ProvisionError<E>),
    /// Connecting or running a command failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The batch finished but some commands failed.
    #[error("{failed} of {total} commands failed")]
    CommandsFailed {
        /// Number of unsuccessful commands.
        failed: usize,
        /// Number of commands run.
        total: usize,
    },
    /// The blocking worker running the batch panicked or was cancelled.
    #[error("command worker stopped unexpectedly: {0}")]
    Worker(String),
}

/// Outcome of a successful run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunReport {
    /// Instance the commands ran on.
    pub instance: ReadyInstance,
    /// One result per command, in command order.
    pub results: Vec<CommandResult>,
}

/// Acquires an instance and runs a command batch on it.
#[derive(Debug)]
pub struct RunOrchestrator<B, D> {
    provisioner: Provisioner<B>,
    executor: Arc<RemoteExecutor<D>>,
    failure_policy: FailurePolicy,
}

impl<B, D> RunOrchestrator<B, D>
where
    B: Backend,
    D: Dialer + Send + Sync + 'static,
{
    /// Creates an orchestrator that aborts on the first failing command.
    #[must_use]
    pub fn new(provisioner: Provisioner<B>, executor: RemoteExecutor<D>) -> Self {
        Self {
            provisioner,
            executor: Arc::new(executor),
            failure_policy: FailurePolicy::Abort,
        }
    }

    /// Overrides the batch failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Runs `commands` in order on one instance, reporting each result
    /// through `on_result` as soon as it completes.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Provision`] when no instance can be acquired,
    /// [`RunError::Remote`] for connection failures and, under
    /// [`FailurePolicy::Abort`], the first failing command.
    /// [`RunError::CommandsFailed`] is returned under
    /// [`FailurePolicy::Continue`] when any command failed.
    pub async fn execute<F>(
        &self,
        commands: Vec<CommandRequest>,
        on_result: F,
    ) -> Result<RunReport, RunError<B::Error>>
    where
        F: FnMut(&CommandResult) + Send + 'static,
    {
        let instance = self.provisioner.acquire_instance().await?;
        let address = SocketAddr::new(instance.public_ip, self.executor.port());
        info!(instance = %instance.id, %address, commands = commands.len(), "running commands");

        let executor = Arc::clone(&self.executor);
        let policy = self.failure_policy;
        let results = task::spawn_blocking(move || {
            executor.run_batch(address, &commands, policy, on_result)
        })
        .await
        .map_err(|err| RunError::Worker(err.to_string()))??;

        let total = results.len();
        let failed = results.iter().filter(|result| !result.is_success()).count();
        if failed > 0 {
            warn!(failed, total, "batch finished with failures");
            return Err(RunError::CommandsFailed { failed, total });
        }

        info!(total, "all commands succeeded");
        Ok(RunReport { instance, results })
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::backend::InstanceRequest;
    use crate::provision::WaitPolicy;
    use crate::remote::{Credential, RetryPolicy};
    use crate::test_support::{ScriptedBackend, ScriptedDial, ScriptedDialer, instance};

    const ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

    fn request() -> InstanceRequest {
        InstanceRequest::builder()
            .image_label("ubuntu")
            .instance_type("DEV1-S")
            .zone("fr-par-1")
            .project_id("project")
            .architecture("x86_64")
            .key_name("grader")
            .build()
            .expect("request fixture should build")
    }

    fn orchestrator(
        backend: &ScriptedBackend,
        dialer: &ScriptedDialer,
    ) -> RunOrchestrator<ScriptedBackend, ScriptedDialer> {
        let provisioner = Provisioner::new(backend.clone(), request()).with_wait_policy(WaitPolicy {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        });
        let executor = RemoteExecutor::new(
            dialer.clone(),
            Credential::new("ubuntu", "pem"),
            RetryPolicy {
                max_attempts: 3,
                retry_interval: Duration::from_millis(1),
                dial_timeout: Duration::from_millis(50),
            },
        )
        .expect("policy should be valid");
        RunOrchestrator::new(provisioner, executor)
    }

    fn commands(lines: &[&str]) -> Vec<CommandRequest> {
        lines.iter().copied().map(CommandRequest::new).collect()
    }

    #[tokio::test]
    async fn runs_commands_on_existing_instance() {
        let backend = ScriptedBackend::new();
        backend.push_listing(vec![instance("srv-1", "running", Some(ADDRESS))]);
        let dialer = ScriptedDialer::new();
        dialer.push_output("ubuntu\n", 0);
        dialer.push_output("/home/ubuntu\n", 0);
        let streamed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&streamed);

        let report = orchestrator(&backend, &dialer)
            .execute(commands(&["whoami", "pwd"]), move |result| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(result.output.clone());
                }
            })
            .await
            .expect("run should succeed");

        assert_eq!(report.instance.id, "srv-1");
        assert_eq!(report.results.len(), 2);
        assert_eq!(
            *streamed.lock().expect("lock"),
            ["ubuntu\n", "/home/ubuntu\n"]
        );
        assert_eq!(backend.create_calls(), 0);
        assert_eq!(dialer.addresses(), [SocketAddr::new(ADDRESS, 22)]);
        assert_eq!(dialer.users(), ["ubuntu"]);
    }

    #[tokio::test]
    async fn creates_instance_and_survives_slow_ssh_daemon() {
        let backend = ScriptedBackend::new();
        backend.push_describe(Some(instance("scripted-id", "starting", None)));
        backend.set_default_describe(Some(instance("scripted-id", "running", Some(ADDRESS))));
        let dialer = ScriptedDialer::new();
        dialer.push_dial(ScriptedDial::Refuse(String::from("connection refused")));
        dialer.push_dial(ScriptedDial::Refuse(String::from("connection refused")));
        dialer.push_output("ok\n", 0);

        let report = orchestrator(&backend, &dialer)
            .execute(commands(&["echo ok"]), |_| {})
            .await
            .expect("run should succeed");

        assert_eq!(backend.create_calls(), 1);
        assert_eq!(report.instance.public_ip, ADDRESS);
        assert_eq!(dialer.dial_calls(), 3);
    }

    #[tokio::test]
    async fn provisioning_failure_skips_remote_work() {
        let backend = ScriptedBackend::new();
        backend.fail_on_create();
        let dialer = ScriptedDialer::new();

        let err = orchestrator(&backend, &dialer)
            .execute(commands(&["whoami"]), |_| {})
            .await
            .expect_err("creation failure is fatal");

        assert!(matches!(err, RunError::Provision(ProvisionError::Create(_))));
        assert_eq!(dialer.dial_calls(), 0);
    }

    #[tokio::test]
    async fn abort_policy_surfaces_first_failure() {
        let backend = ScriptedBackend::new();
        backend.push_listing(vec![instance("srv-1", "running", Some(ADDRESS))]);
        let dialer = ScriptedDialer::new();
        dialer.push_output("", 2);

        let err = orchestrator(&backend, &dialer)
            .execute(commands(&["false", "whoami"]), |_| {})
            .await
            .expect_err("failing command aborts");

        assert!(matches!(
            err,
            RunError::Remote(RemoteError::Command {
                exit_status: Some(2),
                ..
            })
        ));
        assert_eq!(dialer.executed(), ["false"]);
    }

    #[tokio::test]
    async fn continue_policy_reports_failure_count() {
        let backend = ScriptedBackend::new();
        backend.push_listing(vec![instance("srv-1", "running", Some(ADDRESS))]);
        let dialer = ScriptedDialer::new();
        dialer.push_output("", 1);
        dialer.push_output("root\n", 0);

        let err = orchestrator(&backend, &dialer)
            .with_failure_policy(FailurePolicy::Continue)
            .execute(commands(&["false", "whoami"]), |_| {})
            .await
            .expect_err("failures are reported after the batch");

        assert!(matches!(
            err,
            RunError::CommandsFailed {
                failed: 1,
                total: 2
            }
        ));
        assert_eq!(dialer.executed(), ["false", "whoami"]);
    }
}
