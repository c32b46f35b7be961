//! Server listing and lookup for the Scaleway backend.

use serde::Deserialize;
use tracing::debug;

use crate::backend::InstanceHandle;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{InstanceSnapshot, SCALEWAY_INSTANCE_API_BASE, get_json};

const LIST_PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
struct ListServersResponse {
    servers: Vec<scaleway_rs::ScalewayInstance>,
}

/// Requests pages `1..` until one comes back shorter than `page_size`,
/// concatenating them in API order.
pub(super) async fn collect_pages<T, F, Fut>(
    page_size: usize,
    mut fetch_page: F,
) -> Result<Vec<T>, ScalewayBackendError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>, ScalewayBackendError>>,
{
    let mut items = Vec::new();
    let mut page = 1_u32;
    loop {
        let batch = fetch_page(page).await?;
        let last = batch.len() < page_size;
        items.extend(batch);
        if last {
            return Ok(items);
        }
        page = page.saturating_add(1);
    }
}

impl ScalewayBackend {
    /// Lists the project's servers in the configured zone, in API order,
    /// following pagination to the end.
    pub(in crate::scaleway) async fn list_servers(
        &self,
    ) -> Result<Vec<InstanceSnapshot>, ScalewayBackendError> {
        let zone = self.config.default_zone.as_str();
        let url = format!("{SCALEWAY_INSTANCE_API_BASE}/zones/{zone}/servers");
        let url_ref = url.as_str();
        let secret_key = self.config.secret_key.as_str();
        let project = self.config.default_project_id.as_str();
        let per_page = LIST_PAGE_SIZE.to_string();
        let per_page_ref = per_page.as_str();

        let servers = collect_pages(LIST_PAGE_SIZE, move |page| async move {
            let page_number = page.to_string();
            let listing: ListServersResponse = get_json(
                url_ref,
                secret_key,
                &[
                    ("project", project),
                    ("per_page", per_page_ref),
                    ("page", page_number.as_str()),
                ],
            )
            .await?;
            debug!(page, count = listing.servers.len(), "listed server page");
            Ok(listing.servers)
        })
        .await?;

        Ok(servers
            .into_iter()
            .map(|server| InstanceSnapshot::from_server(zone, server))
            .collect())
    }

    pub(in crate::scaleway) async fn fetch_instance(
        &self,
        handle: &InstanceHandle,
    ) -> Result<Option<InstanceSnapshot>, ScalewayBackendError> {
        let mut servers = self
            .api
            .list_instances(&handle.zone)
            .servers(&handle.id)
            .per_page(1)
            .run_async()
            .await?;

        Ok(servers
            .pop()
            .map(|server| InstanceSnapshot::from_server(&handle.zone, server)))
    }
}
