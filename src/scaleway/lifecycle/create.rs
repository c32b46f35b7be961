//! Instance creation helpers for the Scaleway backend.
//!
//! Creation goes through the raw Instances API so the request can carry a
//! security group. Servers come up stopped and are powered on separately.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::InstanceRequest;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{HTTP_CLIENT, InstanceSnapshot, SCALEWAY_INSTANCE_API_BASE, provider_error};

const POWER_ON: &str = "poweron";

#[derive(Debug, Serialize)]
pub(in crate::scaleway) struct CreateServerRequest {
    name: String,
    commercial_type: String,
    image: String,
    project: String,
    dynamic_ip_required: bool,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    security_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<String>,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: scaleway_rs::ScalewayInstance,
}

impl ScalewayBackend {
    pub(in crate::scaleway) fn instance_tags(request: &InstanceRequest) -> Vec<String> {
        vec![String::from("sortie"), format!("key:{}", request.key_name)]
    }

    pub(in crate::scaleway) fn create_payload(
        request: &InstanceRequest,
        image_id: &str,
    ) -> CreateServerRequest {
        CreateServerRequest {
            name: format!("sortie-{}", Uuid::new_v4().simple()),
            commercial_type: request.instance_type.clone(),
            image: image_id.to_owned(),
            project: request.project_id.clone(),
            dynamic_ip_required: true,
            tags: Self::instance_tags(request),
            security_group: request.security_group_id.clone(),
            organization: request.organisation_id.clone(),
        }
    }

    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        snapshot: &InstanceSnapshot,
    ) -> Result<(), ScalewayBackendError> {
        if snapshot.state.as_str() == "running" {
            return Ok(());
        }

        if snapshot
            .allowed_actions
            .iter()
            .any(|action| action.as_str() == POWER_ON)
        {
            self.api
                .perform_instance_action_async(
                    snapshot.zone.as_str(),
                    snapshot.id.as_str(),
                    POWER_ON,
                )
                .await?;
            return Ok(());
        }

        Err(ScalewayBackendError::PowerOnNotAllowed {
            instance_id: snapshot.id.as_str().to_owned(),
            state: snapshot.state.as_str().to_owned(),
        })
    }

    /// Submits the creation request. Never retried: a retry after an
    /// ambiguous failure could leave two billable servers behind.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError`] when the Scaleway API request fails or
    /// the provider rejects the requested instance type.
    pub(in crate::scaleway) async fn create_server(
        &self,
        request: &InstanceRequest,
        image_id: &str,
    ) -> Result<InstanceSnapshot, ScalewayBackendError> {
        let url = format!(
            "{SCALEWAY_INSTANCE_API_BASE}/zones/{}/servers",
            request.zone
        );
        let payload = Self::create_payload(request, image_id);

        let response = HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| provider_error(&err))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| provider_error(&err))?;

        if status.is_success() {
            let parsed: CreateServerResponse =
                serde_json::from_slice(&body).map_err(|err| provider_error(&err))?;
            return Ok(InstanceSnapshot::from_server(&request.zone, parsed.server));
        }

        let message = String::from_utf8_lossy(&body).into_owned();
        if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(&body)
            && Self::is_instance_type_error(&api_err, request)
        {
            return Err(ScalewayBackendError::InstanceTypeUnavailable {
                instance_type: request.instance_type.clone(),
                zone: request.zone.clone(),
            });
        }

        Err(ScalewayBackendError::Provider {
            message: format!("{status}: {message}"),
        })
    }
}
