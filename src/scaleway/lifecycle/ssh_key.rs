//! SSH key lookup through the Scaleway IAM API.
//!
//! Scaleway injects every project key into new servers, so the named key is
//! checked up front rather than attached to the creation payload.

use serde::Deserialize;

use crate::backend::InstanceRequest;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{SCALEWAY_IAM_API_BASE, get_json};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(in crate::scaleway) struct SshKey {
    pub(in crate::scaleway) id: String,
    pub(in crate::scaleway) name: String,
    #[serde(default)]
    pub(in crate::scaleway) disabled: bool,
}

#[derive(Deserialize)]
struct ListSshKeysResponse {
    ssh_keys: Vec<SshKey>,
}

impl ScalewayBackend {
    pub(in crate::scaleway) async fn verify_ssh_key(
        &self,
        request: &InstanceRequest,
    ) -> Result<String, ScalewayBackendError> {
        let url = format!("{SCALEWAY_IAM_API_BASE}/ssh-keys");
        let listing: ListSshKeysResponse = get_json(
            &url,
            &self.config.secret_key,
            &[
                ("project_id", request.project_id.as_str()),
                ("name", request.key_name.as_str()),
            ],
        )
        .await?;

        Self::select_ssh_key(listing.ssh_keys, request)
    }

    /// The IAM name filter is a substring match, so only exact enabled
    /// matches count.
    pub(in crate::scaleway) fn select_ssh_key(
        keys: Vec<SshKey>,
        request: &InstanceRequest,
    ) -> Result<String, ScalewayBackendError> {
        keys.into_iter()
            .find(|key| key.name == request.key_name && !key.disabled)
            .map(|key| key.id)
            .ok_or_else(|| ScalewayBackendError::UnknownSshKey {
                name: request.key_name.clone(),
                project_id: request.project_id.clone(),
            })
    }
}
