//! Scaleway backend implementation of the instance lifecycle.
//!
//! Listing is scoped to the configured project and zone. Creation checks the
//! SSH key and resolves the image before submitting a single request, then
//! powers the new server on.

mod error;
mod lifecycle;
mod types;

use scaleway_rs::ScalewayApi;
use tracing::{debug, info};

use crate::backend::{Backend, BackendFuture, Instance, InstanceHandle, InstanceRequest};
use crate::config::ScalewayConfig;

pub use error::ScalewayBackendError;

/// Backend that provisions instances through the Scaleway Instances API.
#[derive(Clone)]
pub struct ScalewayBackend {
    api: ScalewayApi,
    config: ScalewayConfig,
}

impl ScalewayBackend {
    fn is_instance_type_error(
        api_err: &scaleway_rs::ScalewayApiError,
        request: &InstanceRequest,
    ) -> bool {
        matches!(api_err.resource.as_deref(), Some("commercial_type"))
            || api_err
                .resource_id
                .as_deref()
                .is_some_and(|id| id == request.instance_type)
            || (api_err.etype == "invalid_arguments"
                && api_err
                    .message
                    .to_ascii_lowercase()
                    .contains("commercial_type"))
    }

    /// Constructs a new backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
        })
    }

    /// Builds an instance request using the backend's defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when configuration validation
    /// fails.
    pub fn default_request(&self) -> Result<InstanceRequest, ScalewayBackendError> {
        self.config.as_request().map_err(ScalewayBackendError::from)
    }
}

impl Backend for ScalewayBackend {
    type Error = ScalewayBackendError;

    fn list_instances(&self) -> BackendFuture<'_, Vec<Instance>, Self::Error> {
        Box::pin(async move {
            let servers = self.list_servers().await?;
            debug!(count = servers.len(), zone = %self.config.default_zone, "listed servers");
            Ok(servers
                .into_iter()
                .map(lifecycle::InstanceSnapshot::into_instance)
                .collect())
        })
    }

    fn describe<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> BackendFuture<'a, Option<Instance>, Self::Error> {
        Box::pin(async move {
            Ok(self
                .fetch_instance(handle)
                .await?
                .map(lifecycle::InstanceSnapshot::into_instance))
        })
    }

    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> BackendFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let key_id = self.verify_ssh_key(request).await?;
            debug!(key = %request.key_name, key_id = %key_id, "SSH key registered");
            let image_id = self.resolve_image_id(request).await?;
            debug!(image = %request.image_label, image_id = %image_id, "image resolved");

            let snapshot = self.create_server(request, &image_id).await?;
            info!(
                instance_id = snapshot.id.as_str(),
                zone = %request.zone,
                instance_type = %request.instance_type,
                "server created"
            );
            self.power_on_if_needed(&snapshot).await?;

            Ok(InstanceHandle {
                id: snapshot.id.as_str().to_owned(),
                zone: request.zone.clone(),
            })
        })
    }
}
