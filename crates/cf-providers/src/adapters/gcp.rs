//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Google Compute Engine adapter."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info};

use crate::adapter::{ProviderAdapter, DEFAULT_POLL_INTERVAL};
use crate::error::{ProviderError, Result};
use crate::handle::{InstanceHandle, Provider};
use crate::instance::{CreateInstanceRequest, InstanceInfo, InstanceState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpInstance {
    pub name: String,
    /// Machine type, either bare (`e2-small`) or as a resource URL.
    pub machine_type: String,
    pub status: String,
    /// External NAT address of the first network interface, if any.
    pub nat_ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GcpPage<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GcpInsertSpec {
    pub name: String,
    pub machine_type: String,
    pub source_image: String,
}

/// The Compute Engine calls the adapter needs, scoped to one project.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn list_zones(&self, page_token: Option<String>) -> anyhow::Result<GcpPage<String>>;

    async fn list_instances(
        &self,
        zone: &str,
        page_token: Option<String>,
    ) -> anyhow::Result<GcpPage<GcpInstance>>;

    /// `Ok(None)` when the API answers 404.
    async fn get_instance(&self, zone: &str, name: &str) -> anyhow::Result<Option<GcpInstance>>;

    async fn insert_instance(&self, zone: &str, spec: &GcpInsertSpec) -> anyhow::Result<()>;

    async fn delete_instance(&self, zone: &str, name: &str) -> anyhow::Result<()>;

    async fn start_instance(&self, zone: &str, name: &str) -> anyhow::Result<()>;

    async fn stop_instance(&self, zone: &str, name: &str) -> anyhow::Result<()>;
}

pub fn map_status(status: &str) -> InstanceState {
    match status {
        "PROVISIONING" => InstanceState::Provisioning,
        "STAGING" => InstanceState::Staging,
        "RUNNING" => InstanceState::Running,
        "STOPPING" => InstanceState::Stopping,
        "REPAIRING" => InstanceState::Repairing,
        "TERMINATED" => InstanceState::Terminated,
        _ => InstanceState::Unknown,
    }
}

fn sdk_error(err: anyhow::Error) -> ProviderError {
    ProviderError::upstream(Provider::Gcp, format!("{err:#}"))
}

fn to_info(zone: &str, instance: GcpInstance) -> InstanceInfo {
    let instance_type = instance
        .machine_type
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_owned();
    InstanceInfo {
        provider: Provider::Gcp,
        state: map_status(&instance.status),
        handle: InstanceHandle::new(&instance.name, zone, Provider::Gcp),
        host: instance.nat_ip.unwrap_or_default(),
        name: instance.name,
        instance_type,
    }
}

/// Handles are `(instance name, zone)`.
pub struct GcpAdapter {
    api: Arc<dyn ComputeApi>,
    poll_interval: Duration,
}

impl GcpAdapter {
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self {
            api,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn zones(&self) -> Result<Vec<String>> {
        let mut zones = Vec::new();
        let mut token = None;
        loop {
            let page = self.api.list_zones(token).await.map_err(sdk_error)?;
            zones.extend(page.items);
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        Ok(zones)
    }

    async fn list_zone(&self, zone: &str) -> Result<Vec<InstanceInfo>> {
        let mut instances = Vec::new();
        let mut token = None;
        loop {
            let page = self
                .api
                .list_instances(zone, token)
                .await
                .map_err(sdk_error)?;
            instances.extend(page.items.into_iter().map(|i| to_info(zone, i)));
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        debug!(zone, count = instances.len(), "listed gcp zone");
        Ok(instances)
    }
}

#[async_trait]
impl ProviderAdapter for GcpAdapter {
    fn provider(&self) -> Provider {
        Provider::Gcp
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>> {
        let zones = self.zones().await?;
        let per_zone = try_join_all(zones.iter().map(|zone| self.list_zone(zone))).await?;
        Ok(per_zone.into_iter().flatten().collect())
    }

    async fn create(&self, request: &CreateInstanceRequest) -> Result<InstanceHandle> {
        let spec = GcpInsertSpec {
            name: request.name.clone(),
            machine_type: format!("zones/{}/machineTypes/{}", request.region, request.instance_type),
            source_image: request.image.clone(),
        };
        self.api
            .insert_instance(&request.region, &spec)
            .await
            .map_err(sdk_error)?;
        info!(instance = %request.name, zone = %request.region, "gcp instance created");
        Ok(InstanceHandle::new(&request.name, &request.region, Provider::Gcp))
    }

    async fn delete(&self, handle: &InstanceHandle) -> Result<bool> {
        self.api
            .delete_instance(handle.region(), handle.instance_id())
            .await
            .map_err(sdk_error)?;
        Ok(true)
    }

    async fn start(&self, handle: &InstanceHandle) -> Result<bool> {
        self.api
            .start_instance(handle.region(), handle.instance_id())
            .await
            .map_err(sdk_error)?;
        Ok(true)
    }

    async fn stop(&self, handle: &InstanceHandle) -> Result<bool> {
        self.api
            .stop_instance(handle.region(), handle.instance_id())
            .await
            .map_err(sdk_error)?;
        Ok(true)
    }

    async fn get(&self, handle: &InstanceHandle) -> Result<InstanceInfo> {
        match self
            .api
            .get_instance(handle.region(), handle.instance_id())
            .await
            .map_err(sdk_error)?
        {
            Some(instance) => Ok(to_info(handle.region(), instance)),
            None => Err(ProviderError::NotFound(handle.clone())),
        }
    }
}
