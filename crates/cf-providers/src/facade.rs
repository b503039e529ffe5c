//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Dispatch and fan-out across configured provider adapters."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use crate::adapter::ProviderAdapter;
use crate::error::{ProviderError, Result};
use crate::handle::{InstanceHandle, Provider};
use crate::instance::{CreateInstanceRequest, InstanceInfo, InstanceState};

/// Single entry point over every configured provider adapter.
///
/// Calls are dispatched on the handle's provider tag. Adapter calls share a bounded
/// pool of permits; waits do not hold a permit since they may span minutes.
pub struct MultiProvider {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    permits: Semaphore,
}

impl MultiProvider {
    pub fn new(max_concurrent_calls: usize) -> Self {
        Self {
            adapters: HashMap::new(),
            permits: Semaphore::new(max_concurrent_calls.max(1)),
        }
    }

    /// Register an adapter, replacing any previous one for the same provider.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let provider = adapter.provider();
        if self.adapters.insert(provider, adapter).is_some() {
            warn!(provider = %provider, "replaced existing provider adapter");
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }

    fn adapter(&self, provider: Provider) -> Result<&Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&provider)
            .ok_or(ProviderError::NotInitialized(provider))
    }

    async fn permit(&self, provider: Provider) -> Result<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|err| ProviderError::upstream(provider, err))
    }

    /// Concatenated listing of every configured provider. Order is not significant.
    pub async fn list(&self) -> Result<Vec<InstanceInfo>> {
        let calls = self.adapters.iter().map(|(provider, adapter)| async move {
            let _permit = self.permit(*provider).await?;
            adapter.list().await
        });
        let listings = try_join_all(calls).await?;
        let instances: Vec<InstanceInfo> = listings.into_iter().flatten().collect();
        debug!(count = instances.len(), "listed instances across providers");
        Ok(instances)
    }

    pub async fn create(&self, request: &CreateInstanceRequest) -> Result<InstanceHandle> {
        let adapter = self.adapter(request.provider)?;
        let _permit = self.permit(request.provider).await?;
        adapter.create(request).await
    }

    pub async fn delete(&self, handle: &InstanceHandle) -> Result<bool> {
        let adapter = self.adapter(handle.provider())?;
        let _permit = self.permit(handle.provider()).await?;
        adapter.delete(handle).await
    }

    pub async fn start(&self, handle: &InstanceHandle) -> Result<bool> {
        let adapter = self.adapter(handle.provider())?;
        let _permit = self.permit(handle.provider()).await?;
        adapter.start(handle).await
    }

    pub async fn stop(&self, handle: &InstanceHandle) -> Result<bool> {
        let adapter = self.adapter(handle.provider())?;
        let _permit = self.permit(handle.provider()).await?;
        adapter.stop(handle).await
    }

    pub async fn get(&self, handle: &InstanceHandle) -> Result<InstanceInfo> {
        let adapter = self.adapter(handle.provider())?;
        let _permit = self.permit(handle.provider()).await?;
        adapter.get(handle).await
    }

    pub async fn wait_for_state(
        &self,
        handle: &InstanceHandle,
        target: InstanceState,
        timeout: Duration,
    ) -> Result<bool> {
        self.adapter(handle.provider())?
            .wait_for_state(handle, target, timeout)
            .await
    }

    pub async fn wait_until(
        &self,
        handle: &InstanceHandle,
        accept: fn(InstanceState) -> bool,
        timeout: Duration,
    ) -> Result<bool> {
        self.adapter(handle.provider())?
            .wait_until(handle, accept, timeout)
            .await
    }

    /// Fetch a batch concurrently; each handle keeps its own outcome.
    pub async fn get_many(
        &self,
        handles: &[InstanceHandle],
    ) -> HashMap<InstanceHandle, Result<InstanceInfo>> {
        let fetched = join_all(handles.iter().map(|handle| async move {
            (handle.clone(), self.get(handle).await)
        }))
        .await;
        fetched.into_iter().collect()
    }
}

impl std::fmt::Debug for MultiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiProvider")
            .field("providers", &self.providers())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}
