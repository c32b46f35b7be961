//! Configuration loading via `ortho-config`.
//!
//! [`ScalewayConfig`] describes the instance to find or create and
//! [`SessionConfig`] describes how to reach it and what to run. Both merge
//! defaults, configuration files and environment variables.

use std::env;
use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::InstanceRequest;
use crate::provision::WaitPolicy;
use crate::remote::{FailurePolicy, RetryPolicy};

/// Environment variable consulted when no key path is configured.
pub const PEM_PATH_ENV: &str = "PEM_PATH";

/// Scaleway specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls but accepted so shared Scaleway profiles load cleanly.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Preferred availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for new instances. Defaults to `DEV1-S`.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Human-friendly image label (for example `Ubuntu 24.04 Noble Numbat`).
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
    /// Name of the SSH key registered in the project that new instances
    /// must accept.
    pub ssh_key_name: String,
    /// Security group attached to new instances. The zone default applies
    /// when unset.
    pub security_group_id: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to sortie.toml",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Ok(Self::load_from_iter([OsString::from("sortie")])?)
    }

    /// Builds an [`InstanceRequest`] using the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_request(&self) -> Result<InstanceRequest, ConfigError> {
        self.validate()?;
        InstanceRequest::builder()
            .image_label(&self.default_image)
            .instance_type(&self.default_instance_type)
            .zone(&self.default_zone)
            .project_id(&self.default_project_id)
            .organisation_id(self.default_organization_id.clone())
            .architecture(&self.default_architecture)
            .key_name(&self.ssh_key_name)
            .security_group_id(self.security_group_id.clone())
            .build()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and configuration key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when the security group is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.secret_key,
                FieldMetadata::new("Scaleway API secret key", "SCW_SECRET_KEY", "secret_key"),
            ),
            (
                &self.default_project_id,
                FieldMetadata::new(
                    "Scaleway project ID",
                    "SCW_DEFAULT_PROJECT_ID",
                    "default_project_id",
                ),
            ),
            (
                &self.default_image,
                FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image"),
            ),
            (
                &self.default_instance_type,
                FieldMetadata::new(
                    "instance type",
                    "SCW_DEFAULT_INSTANCE_TYPE",
                    "default_instance_type",
                ),
            ),
            (
                &self.default_zone,
                FieldMetadata::new("availability zone", "SCW_DEFAULT_ZONE", "default_zone"),
            ),
            (
                &self.default_architecture,
                FieldMetadata::new(
                    "CPU architecture",
                    "SCW_DEFAULT_ARCHITECTURE",
                    "default_architecture",
                ),
            ),
            (
                &self.ssh_key_name,
                FieldMetadata::new("SSH key name", "SCW_SSH_KEY_NAME", "ssh_key_name"),
            ),
        ];
        for (value, metadata) in &required {
            require_field(value, metadata)?;
        }

        if self
            .security_group_id
            .as_deref()
            .is_some_and(|group| group.trim().is_empty())
        {
            return Err(ConfigError::Invalid(String::from(
                "security_group_id must not be blank when set",
            )));
        }
        Ok(())
    }
}

/// Connection and batch settings for a run.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SORTIE",
    discovery(
        app_name = "sortie",
        env_var = "SORTIE_CONFIG_PATH",
        config_file_name = "sortie.toml",
        dotfile_name = ".sortie.toml",
        project_file_name = "sortie.toml"
    )
)]
pub struct SessionConfig {
    /// Login identity on the instance.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// SSH port on the instance.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Path to the PEM private key. Falls back to `PEM_PATH` when unset.
    pub pem_path: Option<String>,
    /// Total number of dial attempts.
    #[ortho_config(default = 5)]
    pub connect_attempts: u32,
    /// Seconds between failed dial attempts.
    #[ortho_config(default = 10)]
    pub connect_retry_interval_secs: u64,
    /// Upper bound on one dial attempt, in seconds.
    #[ortho_config(default = 5)]
    pub dial_timeout_secs: u64,
    /// Seconds between instance state queries.
    #[ortho_config(default = 5)]
    pub ready_poll_interval_secs: u64,
    /// Overall deadline for an instance to reach `running`, in seconds.
    #[ortho_config(default = 600)]
    pub ready_timeout_secs: u64,
    /// File listing the commands to run.
    #[ortho_config(default = "cmd".to_owned())]
    pub command_file: String,
    /// Keep running the remaining commands after one fails.
    #[ortho_config(default = false)]
    pub keep_going: bool,
}

impl SessionConfig {
    /// Loads session configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Ok(Self::load_from_iter([OsString::from("sortie")])?)
    }

    /// Rejects settings that would make a run unbounded or impossible.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_owned()));
        if self.ssh_user.trim().is_empty() {
            return invalid("ssh_user must not be empty");
        }
        if self.connect_attempts == 0 {
            return invalid("connect_attempts must be at least 1");
        }
        if self.dial_timeout_secs == 0 {
            return invalid("dial_timeout_secs must be greater than zero");
        }
        if self.ready_poll_interval_secs == 0 {
            return invalid("ready_poll_interval_secs must be greater than zero");
        }
        if self.ready_timeout_secs == 0 {
            return invalid("ready_timeout_secs must be greater than zero");
        }
        if self
            .pem_path
            .as_deref()
            .is_some_and(|path| path.trim().is_empty())
        {
            return invalid("pem_path must not be blank when set");
        }
        Ok(())
    }

    /// Dial retry settings.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_attempts,
            retry_interval: Duration::from_secs(self.connect_retry_interval_secs),
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
        }
    }

    /// Readiness polling settings.
    #[must_use]
    pub const fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_secs(self.ready_poll_interval_secs),
            timeout: Duration::from_secs(self.ready_timeout_secs),
        }
    }

    /// Port dialled on the instance.
    #[must_use]
    pub const fn socket_port(&self) -> u16 {
        self.ssh_port
    }

    /// Batch behaviour when a command fails.
    #[must_use]
    pub const fn failure_policy(&self) -> FailurePolicy {
        if self.keep_going {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Abort
        }
    }

    /// Resolves the private key path from configuration, then `PEM_PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when neither source names a path.
    pub fn pem_path(&self) -> Result<Utf8PathBuf, ConfigError> {
        let from_env = env::var(PEM_PATH_ENV).ok();
        resolve_pem_path(self.pem_path.as_deref(), from_env.as_deref())
    }
}

fn resolve_pem_path(
    configured: Option<&str>,
    from_env: Option<&str>,
) -> Result<Utf8PathBuf, ConfigError> {
    configured
        .or(from_env)
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(Utf8PathBuf::from)
        .ok_or_else(|| {
            ConfigError::MissingField(format!(
                "missing SSH private key path: set {PEM_PATH_ENV} or SORTIE_PEM_PATH, \
                 or add pem_path to sortie.toml"
            ))
        })
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<std::sync::Arc<ortho_config::OrthoError>> for ConfigError {
    fn from(value: std::sync::Arc<ortho_config::OrthoError>) -> Self {
        Self::Parse(value.to_string())
    }
}
