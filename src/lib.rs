//! Core library for the `sortie` remote command runner.
//!
//! A run acquires exactly one running compute instance, reusing the first
//! one the control plane reports or creating and awaiting a new one, then
//! executes a batch of shell commands on it over a single SSH connection
//! with bounded connect retries.
//!
//! The [`backend::Backend`] trait abstracts the control plane and
//! [`remote::Dialer`] abstracts the SSH transport, so the
//! [`provision::Provisioner`] and [`remote::RemoteExecutor`] state machines
//! can be exercised against the doubles in [`test_support`].

pub mod backend;
pub mod commands;
pub mod config;
mod files;
pub mod provision;
pub mod remote;
pub mod run;
pub mod scaleway;
pub mod telemetry;
pub mod test_support;

pub use backend::{
    Backend, Instance, InstanceHandle, InstanceRequest, InstanceRequestBuilder, InstanceState,
    ReadyInstance,
};
pub use commands::{CommandFileError, CommandRequest, CommandResult, load_commands};
pub use config::{ConfigError, ScalewayConfig, SessionConfig};
pub use provision::{DiscoveryError, ProvisionError, Provisioner, WaitPolicy};
pub use remote::{
    Credential, CredentialError, FailurePolicy, RemoteError, RemoteExecutor, RetryPolicy,
    Ssh2Dialer,
};
pub use run::{RunError, RunOrchestrator, RunReport};
pub use scaleway::{ScalewayBackend, ScalewayBackendError};
