//! Control-plane abstraction for discovering and creating compute instances.
//!
//! A [`Backend`] exposes the three capabilities the provisioner relies on:
//! listing every known instance, describing one instance by handle, and
//! creating a new instance from an [`InstanceRequest`]. Instances are owned by
//! the provider; nothing in this crate deletes them.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

/// Parameters required to create a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRequest {
    /// Human readable label used for the boot image. The backend resolves this
    /// to a provider specific image identifier.
    pub image_label: String,
    /// Commercial type or flavour to request (for example `DEV1-S`).
    pub instance_type: String,
    /// Target availability zone (for example `fr-par-1`).
    pub zone: String,
    /// Project identifier used for billing and ownership.
    pub project_id: String,
    /// Optional organisation identifier when the provider requires one.
    pub organisation_id: Option<String>,
    /// CPU architecture requested for the instance.
    pub architecture: String,
    /// Name of the SSH key pair whose public half must be authorised on the
    /// new instance.
    pub key_name: String,
    /// Optional network-access (security) group applied to the instance.
    pub security_group_id: Option<String>,
}

impl InstanceRequest {
    /// Starts a builder for an [`InstanceRequest`].
    #[must_use]
    pub fn builder() -> InstanceRequestBuilder {
        InstanceRequestBuilder::new()
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when any required string field is
    /// empty, or when an optional field is present but blank.
    pub fn validate(&self) -> Result<(), BackendError> {
        let required = [
            (&self.image_label, "image_label"),
            (&self.instance_type, "instance_type"),
            (&self.zone, "zone"),
            (&self.project_id, "project_id"),
            (&self.architecture, "architecture"),
            (&self.key_name, "key_name"),
        ];
        for (value, field) in required {
            if value.is_empty() {
                return Err(BackendError::Validation(field.to_owned()));
            }
        }
        if self
            .security_group_id
            .as_deref()
            .is_some_and(str::is_empty)
        {
            return Err(BackendError::Validation(String::from("security_group_id")));
        }
        Ok(())
    }
}

/// Builder for [`InstanceRequest`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceRequestBuilder {
    image_label: String,
    instance_type: String,
    zone: String,
    project_id: String,
    organisation_id: Option<String>,
    architecture: String,
    key_name: String,
    security_group_id: Option<String>,
}

impl InstanceRequestBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image label.
    #[must_use]
    pub fn image_label(mut self, value: impl Into<String>) -> Self {
        self.image_label = value.into();
        self
    }

    /// Sets the instance type.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn zone(mut self, value: impl Into<String>) -> Self {
        self.zone = value.into();
        self
    }

    /// Sets the project identifier.
    #[must_use]
    pub fn project_id(mut self, value: impl Into<String>) -> Self {
        self.project_id = value.into();
        self
    }

    /// Sets the optional organisation identifier.
    #[must_use]
    pub fn organisation_id(mut self, value: Option<String>) -> Self {
        self.organisation_id = value;
        self
    }

    /// Sets the architecture.
    #[must_use]
    pub fn architecture(mut self, value: impl Into<String>) -> Self {
        self.architecture = value.into();
        self
    }

    /// Sets the SSH key pair name.
    #[must_use]
    pub fn key_name(mut self, value: impl Into<String>) -> Self {
        self.key_name = value.into();
        self
    }

    /// Sets the optional security group identifier.
    #[must_use]
    pub fn security_group_id(mut self, value: Option<String>) -> Self {
        self.security_group_id = value;
        self
    }

    /// Builds and validates the [`InstanceRequest`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<InstanceRequest, BackendError> {
        let request = InstanceRequest {
            image_label: self.image_label.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            zone: self.zone.trim().to_owned(),
            project_id: self.project_id.trim().to_owned(),
            organisation_id: self.organisation_id.map(|value| value.trim().to_owned()),
            architecture: self.architecture.trim().to_owned(),
            key_name: self.key_name.trim().to_owned(),
            security_group_id: self.security_group_id.map(|value| value.trim().to_owned()),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Lifecycle state reported by the control plane.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// The instance is booting or otherwise on its way to `running`.
    Pending,
    /// The instance is operational.
    Running,
    /// The instance is shutting down.
    Stopping,
    /// The instance is powered off but still exists.
    Stopped,
    /// The instance has been destroyed and will never run again.
    Terminated,
    /// Any other provider-defined state, kept verbatim.
    Other(String),
}

impl InstanceState {
    /// Literal state tag that identifies an operational instance.
    pub const RUNNING: &'static str = "running";

    /// Maps a provider state tag onto the shared state model.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            Self::RUNNING => Self::Running,
            "pending" | "starting" => Self::Pending,
            "stopping" => Self::Stopping,
            "stopped" | "stopped in place" => Self::Stopped,
            "terminated" => Self::Terminated,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns `true` for the `running` state.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` when the instance can never reach `running` again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str(Self::RUNNING),
            Self::Stopping => f.write_str("stopping"),
            Self::Stopped => f.write_str("stopped"),
            Self::Terminated => f.write_str("terminated"),
            Self::Other(tag) => f.write_str(tag),
        }
    }
}

/// Handle identifying an instance for follow-up calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Provider specific identifier for the instance.
    pub id: String,
    /// Zone in which the instance lives.
    pub zone: String,
}

/// Instance record as reported by the control plane.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Provider specific identifier for the instance.
    pub id: String,
    /// Zone in which the instance lives.
    pub zone: String,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Public address; absent until the provider assigns one.
    pub public_ip: Option<IpAddr>,
}

impl Instance {
    /// Returns the handle used to refer to this instance.
    #[must_use]
    pub fn handle(&self) -> InstanceHandle {
        InstanceHandle {
            id: self.id.clone(),
            zone: self.zone.clone(),
        }
    }

    /// Converts the record into a [`ReadyInstance`] when it is running and
    /// has a public address.
    #[must_use]
    pub fn into_ready(self) -> Option<ReadyInstance> {
        if !self.state.is_running() {
            return None;
        }
        let public_ip = self.public_ip?;
        Some(ReadyInstance {
            id: self.id,
            zone: self.zone,
            public_ip,
        })
    }
}

/// An instance in the `running` state with a public address assigned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadyInstance {
    /// Provider specific identifier for the instance.
    pub id: String,
    /// Zone in which the instance lives.
    pub zone: String,
    /// Public address used to reach the instance.
    pub public_ip: IpAddr,
}

/// Errors raised by backends.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by compute control planes.
pub trait Backend {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every instance visible to the caller, in provider order.
    fn list_instances(&self) -> BackendFuture<'_, Vec<Instance>, Self::Error>;

    /// Fetches the current record for one instance, or `None` when the
    /// provider no longer knows about it.
    fn describe<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> BackendFuture<'a, Option<Instance>, Self::Error>;

    /// Creates a new instance and returns a handle used for subsequent calls.
    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> BackendFuture<'a, InstanceHandle, Self::Error>;
}
