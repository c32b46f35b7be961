//! Instance lifecycle helpers for the Scaleway backend.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::backend::{Instance, InstanceState};
use crate::scaleway::types::{Action, ServerId, ServerState, Zone};

use super::ScalewayBackendError;

mod create;
mod image;
mod listing;
mod ssh_key;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
const SCALEWAY_IAM_API_BASE: &str = "https://api.scaleway.com/iam/v1alpha1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Provider view of a server, trimmed to the fields the lifecycle needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSnapshot {
    pub(crate) id: ServerId,
    pub(crate) zone: Zone,
    pub(crate) state: ServerState,
    pub(crate) allowed_actions: Vec<Action>,
    pub(crate) public_ip: Option<String>,
}

impl InstanceSnapshot {
    pub(crate) fn from_server(zone: &str, server: scaleway_rs::ScalewayInstance) -> Self {
        Self {
            id: server.id.into(),
            zone: Zone::from(zone),
            state: server.state.into(),
            allowed_actions: server
                .allowed_actions
                .into_iter()
                .map(Action::from)
                .collect(),
            public_ip: server.public_ip.map(|ip| ip.address),
        }
    }

    /// Unparseable addresses are treated as not yet assigned.
    pub(crate) fn into_instance(self) -> Instance {
        Instance {
            id: self.id.as_str().to_owned(),
            zone: self.zone.as_str().to_owned(),
            state: InstanceState::from_tag(self.state.as_str()),
            public_ip: self
                .public_ip
                .as_deref()
                .and_then(|ip| IpAddr::from_str(ip).ok()),
        }
    }
}

fn provider_error(err: &impl fmt::Display) -> ScalewayBackendError {
    ScalewayBackendError::Provider {
        message: err.to_string(),
    }
}

/// Issues an authenticated `GET` and decodes the JSON body.
async fn get_json<T: DeserializeOwned>(
    url: &str,
    secret_key: &str,
    query: &[(&str, &str)],
) -> Result<T, ScalewayBackendError> {
    let response = HTTP_CLIENT
        .get(url)
        .header("X-Auth-Token", secret_key)
        .query(query)
        .send()
        .await
        .map_err(|err| provider_error(&err))?;

    let status = response.status();
    let body = response.bytes().await.map_err(|err| provider_error(&err))?;
    if !status.is_success() {
        return Err(ScalewayBackendError::Provider {
            message: format!("{status}: {}", String::from_utf8_lossy(&body)),
        });
    }
    serde_json::from_slice(&body).map_err(|err| provider_error(&err))
}
