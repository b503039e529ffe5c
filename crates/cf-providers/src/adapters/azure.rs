//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Azure virtual machine adapter."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::adapter::{ProviderAdapter, DEFAULT_POLL_INTERVAL};
use crate::error::{ProviderError, Result};
use crate::handle::{InstanceHandle, Provider};
use crate::instance::{CreateInstanceRequest, InstanceInfo, InstanceState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureVm {
    pub name: String,
    pub size: String,
    /// Power state code, e.g. `PowerState/running`. Absent while the VM is provisioning.
    pub power_state: Option<String>,
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AzurePage {
    pub vms: Vec<AzureVm>,
    pub next_link: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AzureVmSpec {
    pub name: String,
    pub size: String,
    pub image: String,
    pub location: String,
}

/// The Azure compute calls the adapter needs.
#[async_trait]
pub trait AzureComputeApi: Send + Sync {
    async fn list_by_resource_group(
        &self,
        resource_group: &str,
        next_link: Option<String>,
    ) -> anyhow::Result<AzurePage>;

    /// `Ok(None)` when the VM does not exist.
    async fn get_vm(&self, resource_group: &str, name: &str) -> anyhow::Result<Option<AzureVm>>;

    async fn create_vm(&self, resource_group: &str, spec: &AzureVmSpec) -> anyhow::Result<()>;

    async fn delete_vm(&self, resource_group: &str, name: &str) -> anyhow::Result<()>;

    async fn start_vm(&self, resource_group: &str, name: &str) -> anyhow::Result<()>;

    /// Stop and release compute; the VM settles in `deallocated`.
    async fn deallocate_vm(&self, resource_group: &str, name: &str) -> anyhow::Result<()>;
}

/// Map an Azure power state; anything unrecognised is `UNKNOWN`.
pub fn map_power_state(power_state: Option<&str>) -> InstanceState {
    let Some(raw) = power_state else {
        return InstanceState::Unknown;
    };
    let code = raw.rsplit('/').next().unwrap_or(raw).to_ascii_lowercase();
    match code.as_str() {
        "deallocated" => InstanceState::Deallocated,
        "deallocating" => InstanceState::Deallocating,
        "running" => InstanceState::Running,
        "starting" => InstanceState::Starting,
        "stopped" => InstanceState::Stopped,
        "stopping" => InstanceState::Stopping,
        _ => InstanceState::Unknown,
    }
}

fn sdk_error(err: anyhow::Error) -> ProviderError {
    ProviderError::upstream(Provider::Azure, format!("{err:#}"))
}

/// Handles are `(vm name, resource group)`; all VMs live in one resource group.
pub struct AzureAdapter {
    api: Arc<dyn AzureComputeApi>,
    resource_group: String,
    poll_interval: Duration,
}

impl AzureAdapter {
    pub fn new(api: Arc<dyn AzureComputeApi>, resource_group: impl Into<String>) -> Self {
        Self {
            api,
            resource_group: resource_group.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn to_info(&self, resource_group: &str, vm: AzureVm) -> InstanceInfo {
        InstanceInfo {
            provider: Provider::Azure,
            state: map_power_state(vm.power_state.as_deref()),
            handle: InstanceHandle::new(&vm.name, resource_group, Provider::Azure),
            host: vm.public_ip.unwrap_or_default(),
            name: vm.name,
            instance_type: vm.size,
        }
    }
}

#[async_trait]
impl ProviderAdapter for AzureAdapter {
    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>> {
        let mut instances = Vec::new();
        let mut link = None;
        loop {
            let page = self
                .api
                .list_by_resource_group(&self.resource_group, link)
                .await
                .map_err(sdk_error)?;
            instances.extend(
                page.vms
                    .into_iter()
                    .map(|vm| self.to_info(&self.resource_group, vm)),
            );
            match page.next_link {
                Some(next) if !next.is_empty() => link = Some(next),
                _ => break,
            }
        }
        debug!(resource_group = %self.resource_group, count = instances.len(), "listed azure vms");
        Ok(instances)
    }

    async fn create(&self, request: &CreateInstanceRequest) -> Result<InstanceHandle> {
        let spec = AzureVmSpec {
            name: request.name.clone(),
            size: request.instance_type.clone(),
            image: request.image.clone(),
            location: request.region.clone(),
        };
        self.api
            .create_vm(&self.resource_group, &spec)
            .await
            .map_err(sdk_error)?;
        info!(vm = %request.name, location = %request.region, "azure vm created");
        Ok(InstanceHandle::new(
            &request.name,
            &self.resource_group,
            Provider::Azure,
        ))
    }

    async fn delete(&self, handle: &InstanceHandle) -> Result<bool> {
        self.api
            .delete_vm(handle.region(), handle.instance_id())
            .await
            .map_err(sdk_error)?;
        Ok(true)
    }

    async fn start(&self, handle: &InstanceHandle) -> Result<bool> {
        self.api
            .start_vm(handle.region(), handle.instance_id())
            .await
            .map_err(sdk_error)?;
        Ok(true)
    }

    async fn stop(&self, handle: &InstanceHandle) -> Result<bool> {
        self.api
            .deallocate_vm(handle.region(), handle.instance_id())
            .await
            .map_err(sdk_error)?;
        Ok(true)
    }

    async fn get(&self, handle: &InstanceHandle) -> Result<InstanceInfo> {
        match self
            .api
            .get_vm(handle.region(), handle.instance_id())
            .await
            .map_err(sdk_error)?
        {
            Some(vm) => Ok(self.to_info(handle.region(), vm)),
            None => Err(ProviderError::NotFound(handle.clone())),
        }
    }
}
