//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Capability contract implemented by every cloud integration."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::handle::{InstanceHandle, Provider};
use crate::instance::{CreateInstanceRequest, InstanceInfo, InstanceState};
use crate::poll::poll_until;

/// Spacing between `get` calls while waiting for a state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Uniform interface implemented by provider-specific adapters.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider tag this adapter serves.
    fn provider(&self) -> Provider;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Every instance visible to the account, across pages and regions.
    async fn list(&self) -> Result<Vec<InstanceInfo>>;

    async fn create(&self, request: &CreateInstanceRequest) -> Result<InstanceHandle>;

    async fn delete(&self, handle: &InstanceHandle) -> Result<bool>;

    async fn start(&self, handle: &InstanceHandle) -> Result<bool>;

    async fn stop(&self, handle: &InstanceHandle) -> Result<bool>;

    /// Live description of one instance. Vanished instances raise
    /// [`ProviderError::NotFound`](crate::ProviderError::NotFound).
    async fn get(&self, handle: &InstanceHandle) -> Result<InstanceInfo>;

    /// Poll `get` until the instance reports `target`. `Ok(false)` on timeout.
    async fn wait_for_state(
        &self,
        handle: &InstanceHandle,
        target: InstanceState,
        timeout: Duration,
    ) -> Result<bool> {
        let this = self;
        poll_until(self.poll_interval(), timeout, move || async move {
            Ok(this.get(handle).await?.state == target)
        })
        .await
    }

    /// Poll `get` until `accept` holds for the reported state. `Ok(false)` on timeout.
    async fn wait_until(
        &self,
        handle: &InstanceHandle,
        accept: fn(InstanceState) -> bool,
        timeout: Duration,
    ) -> Result<bool> {
        let this = self;
        poll_until(self.poll_interval(), timeout, move || async move {
            Ok(accept(this.get(handle).await?.state))
        })
        .await
    }
}
