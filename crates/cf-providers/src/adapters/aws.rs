//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "AWS EC2 adapter."
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

const NAME_TAG: &str = "Name";
const UNNAMED: &str = "No name";

/// One instance as described by EC2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ec2Instance {
    pub instance_id: String,
    pub instance_type: String,
    pub state_code: i32,
    pub tags: Vec<(String, String)>,
    pub public_dns_name: String,
}

/// One page of a `DescribeInstances` response.
#[derive(Debug, Clone, Default)]
pub struct Ec2Page {
    pub instances: Vec<Ec2Instance>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Ec2LaunchSpec {
    pub name: String,
    pub instance_type: String,
    pub image_id: String,
}

/// The EC2 calls the adapter needs.
#[async_trait]
pub trait Ec2Api: Send + Sync {
    async fn describe_regions(&self) -> anyhow::Result<Vec<String>>;

    /// Describe instances in `region`; an empty id list means all of them.
    async fn describe_instances(
        &self,
        region: &str,
        instance_ids: &[String],
        next_token: Option<String>,
    ) -> anyhow::Result<Ec2Page>;

    /// Launch one instance tagged with its name and return its id.
    async fn run_instance(&self, region: &str, spec: &Ec2LaunchSpec) -> anyhow::Result<String>;

    async fn terminate_instance(&self, region: &str, instance_id: &str) -> anyhow::Result<()>;

    async fn start_instance(&self, region: &str, instance_id: &str) -> anyhow::Result<()>;

    async fn stop_instance(&self, region: &str, instance_id: &str) -> anyhow::Result<()>;
}

/// Map an EC2 state code. Only the low byte is meaningful.
pub fn map_state_code(code: i32) -> InstanceState {
    match code & 0xFF {
        0 => InstanceState::Pending,
        16 => InstanceState::Running,
        32 => InstanceState::Deleting,
        48 => InstanceState::Deleted,
        64 => InstanceState::Stopping,
        80 => InstanceState::Stopped,
        _ => InstanceState::Unknown,
    }
}

pub struct AwsAdapter {
    api: Arc<dyn Ec2Api>,
    regions: Vec<String>,
    poll_interval: Duration,
}

impl AwsAdapter {
    /// `regions` limits listing; when empty every region the account reports is scanned.
    pub fn new(api: Arc<dyn Ec2Api>, regions: Vec<String>) -> Self {
        Self {
            api,
            regions,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn regions(&self) -> Result<Vec<String>> {
        if !self.regions.is_empty() {
            return Ok(self.regions.clone());
        }
        self.api
            .describe_regions()
            .await
            .map_err(sdk_error)
    }

    async fn list_region(&self, region: &str) -> Result<Vec<InstanceInfo>> {
        let mut instances = Vec::new();
        let mut token = None;
        loop {
            let page = self
                .api
                .describe_instances(region, &[], token)
                .await
                .map_err(sdk_error)?;
            instances.extend(page.instances.into_iter().map(|i| to_info(region, i)));
            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        debug!(region, count = instances.len(), "listed aws region");
        Ok(instances)
    }
}

fn sdk_error(err: anyhow::Error) -> ProviderError {
    ProviderError::upstream(Provider::Aws, format!("{err:#}"))
}

fn to_info(region: &str, instance: Ec2Instance) -> InstanceInfo {
    let name = instance
        .tags
        .iter()
        .find(|(key, _)| key == NAME_TAG)
        .map(|(_, value)| value.clone())
        .unwrap_or_else(|| UNNAMED.to_owned());
    InstanceInfo {
        provider: Provider::Aws,
        name,
        instance_type: instance.instance_type,
        state: map_state_code(instance.state_code),
        handle: InstanceHandle::new(instance.instance_id, region, Provider::Aws),
        host: instance.public_dns_name,
    }
}

#[async_trait]
impl ProviderAdapter for AwsAdapter {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>> {
        let regions = self.regions().await?;
        let pages = try_join_all(regions.iter().map(|region| self.list_region(region))).await?;
        Ok(pages.into_iter().flatten().collect())
    }

    async fn create(&self, request: &CreateInstanceRequest) -> Result<InstanceHandle> {
        let spec = Ec2LaunchSpec {
            name: request.name.clone(),
            instance_type: request.instance_type.clone(),
            image_id: request.image.clone(),
        };
        let instance_id = self
            .api
            .run_instance(&request.region, &spec)
            .await
            .map_err(sdk_error)?;
        info!(instance = %instance_id, region = %request.region, "aws instance created");
        Ok(InstanceHandle::new(instance_id, &request.region, Provider::Aws))
    }

    async fn delete(&self, handle: &InstanceHandle) -> Result<bool> {
        self.api
            .terminate_instance(handle.region(), handle.instance_id())
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
        let ids = [handle.instance_id().to_owned()];
        let page = self
            .api
            .describe_instances(handle.region(), &ids, None)
            .await
            .map_err(sdk_error)?;
        page.instances
            .into_iter()
            .find(|instance| instance.instance_id == handle.instance_id())
            .map(|instance| to_info(handle.region(), instance))
            .ok_or_else(|| ProviderError::NotFound(handle.clone()))
    }
}
