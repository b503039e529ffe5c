//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "In-memory adapter used by simulation mode and tests."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::adapter::ProviderAdapter;
use crate::error::{ProviderError, Result};
use crate::handle::{InstanceHandle, Provider};
use crate::instance::{CreateInstanceRequest, InstanceInfo, InstanceState};

/// One observable interaction with the simulated cloud, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedCall {
    Create(InstanceHandle),
    Delete(InstanceHandle),
    Start(InstanceHandle),
    Stop(InstanceHandle),
    /// A `get` together with the state it reported.
    Get(InstanceHandle, InstanceState),
}

#[derive(Debug, Clone)]
struct SimulatedInstance {
    info: InstanceInfo,
    /// Final state the instance settles into once `remaining_polls` reaches zero.
    settling_to: Option<InstanceState>,
    remaining_polls: u32,
}

#[derive(Debug, Default)]
struct SimulatedCloud {
    instances: IndexMap<InstanceHandle, SimulatedInstance>,
    journal: Vec<SimulatedCall>,
    failing: HashSet<InstanceHandle>,
    next_id: u64,
}

/// Cloud stand-in holding instances in memory.
///
/// Start and stop requests move an instance through the provider's own transitional
/// vocabulary (AWS `PENDING`, GCP `STAGING`, Azure `STARTING`, and so on) and settle
/// after `settle_polls` observations via `get`.
#[derive(Debug)]
pub struct SimulatedAdapter {
    provider: Provider,
    settle_polls: u32,
    poll_interval: Duration,
    cloud: Mutex<SimulatedCloud>,
}

impl SimulatedAdapter {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            settle_polls: 1,
            poll_interval: Duration::from_millis(10),
            cloud: Mutex::new(SimulatedCloud::default()),
        }
    }

    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Place an existing instance into the simulated cloud and return its handle.
    pub fn seed(
        &self,
        instance_id: &str,
        region: &str,
        host: &str,
        state: InstanceState,
    ) -> InstanceHandle {
        let handle = InstanceHandle::new(instance_id, region, self.provider);
        let info = InstanceInfo {
            provider: self.provider,
            name: instance_id.to_owned(),
            instance_type: "simulated".to_owned(),
            state,
            handle: handle.clone(),
            host: host.to_owned(),
        };
        self.cloud.lock().instances.insert(
            handle.clone(),
            SimulatedInstance {
                info,
                settling_to: None,
                remaining_polls: 0,
            },
        );
        handle
    }

    /// Remove an instance behind the system's back; later calls report NotFound.
    pub fn vanish(&self, handle: &InstanceHandle) {
        self.cloud.lock().instances.shift_remove(handle);
    }

    /// Force a state, cancelling any pending settle.
    pub fn set_state(&self, handle: &InstanceHandle, state: InstanceState) {
        if let Some(instance) = self.cloud.lock().instances.get_mut(handle) {
            instance.info.state = state;
            instance.settling_to = None;
        }
    }

    /// Current state without recording a journal entry or advancing a settle.
    pub fn peek(&self, handle: &InstanceHandle) -> Option<InstanceState> {
        self.cloud
            .lock()
            .instances
            .get(handle)
            .map(|instance| instance.info.state)
    }

    /// Make every call touching `handle` fail with an upstream error.
    pub fn fail_calls_for(&self, handle: &InstanceHandle) {
        self.cloud.lock().failing.insert(handle.clone());
    }

    pub fn journal(&self) -> Vec<SimulatedCall> {
        self.cloud.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.cloud.lock().journal.clear();
    }

    fn starting_state(&self) -> InstanceState {
        match self.provider {
            Provider::Aws => InstanceState::Pending,
            Provider::Gcp => InstanceState::Staging,
            Provider::Azure => InstanceState::Starting,
        }
    }

    fn stopping_states(&self) -> (InstanceState, InstanceState) {
        match self.provider {
            Provider::Aws => (InstanceState::Stopping, InstanceState::Stopped),
            Provider::Gcp => (InstanceState::Stopping, InstanceState::Terminated),
            Provider::Azure => (InstanceState::Deallocating, InstanceState::Deallocated),
        }
    }

    fn check_failing(&self, cloud: &SimulatedCloud, handle: &InstanceHandle) -> Result<()> {
        if cloud.failing.contains(handle) {
            return Err(ProviderError::upstream(
                self.provider,
                format!("injected failure for {handle}"),
            ));
        }
        Ok(())
    }

    fn begin(&self, instance: &mut SimulatedInstance, transitional: InstanceState, settled: InstanceState) {
        if self.settle_polls == 0 {
            instance.info.state = settled;
            instance.settling_to = None;
        } else {
            instance.info.state = transitional;
            instance.settling_to = Some(settled);
            instance.remaining_polls = self.settle_polls;
        }
    }
}

#[async_trait]
impl ProviderAdapter for SimulatedAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>> {
        let cloud = self.cloud.lock();
        Ok(cloud
            .instances
            .values()
            .map(|instance| instance.info.clone())
            .collect())
    }

    async fn create(&self, request: &CreateInstanceRequest) -> Result<InstanceHandle> {
        let mut cloud = self.cloud.lock();
        cloud.next_id += 1;
        let instance_id = match self.provider {
            Provider::Aws => format!("i-sim{:08x}", cloud.next_id),
            Provider::Gcp | Provider::Azure => request.name.clone(),
        };
        let handle = InstanceHandle::new(instance_id, &request.region, self.provider);
        if cloud.instances.contains_key(&handle) {
            return Err(ProviderError::upstream(
                self.provider,
                format!("instance {handle} already exists"),
            ));
        }
        let mut instance = SimulatedInstance {
            info: InstanceInfo {
                provider: self.provider,
                name: request.name.clone(),
                instance_type: request.instance_type.clone(),
                state: InstanceState::Provisioning,
                handle: handle.clone(),
                host: format!("{}.{}.sim", request.name, request.region),
            },
            settling_to: None,
            remaining_polls: 0,
        };
        self.begin(&mut instance, self.starting_state(), InstanceState::Running);
        cloud.instances.insert(handle.clone(), instance);
        cloud.journal.push(SimulatedCall::Create(handle.clone()));
        Ok(handle)
    }

    async fn delete(&self, handle: &InstanceHandle) -> Result<bool> {
        let mut cloud = self.cloud.lock();
        self.check_failing(&cloud, handle)?;
        cloud.journal.push(SimulatedCall::Delete(handle.clone()));
        match cloud.instances.shift_remove(handle) {
            Some(_) => Ok(true),
            None => Err(ProviderError::NotFound(handle.clone())),
        }
    }

    async fn start(&self, handle: &InstanceHandle) -> Result<bool> {
        let mut cloud = self.cloud.lock();
        self.check_failing(&cloud, handle)?;
        cloud.journal.push(SimulatedCall::Start(handle.clone()));
        let transitional = self.starting_state();
        let instance = cloud
            .instances
            .get_mut(handle)
            .ok_or_else(|| ProviderError::NotFound(handle.clone()))?;
        if instance.info.state != InstanceState::Running
            && instance.settling_to != Some(InstanceState::Running)
        {
            self.begin(instance, transitional, InstanceState::Running);
        }
        debug!(handle = %handle, state = %instance.info.state, "simulated start");
        Ok(true)
    }

    async fn stop(&self, handle: &InstanceHandle) -> Result<bool> {
        let mut cloud = self.cloud.lock();
        self.check_failing(&cloud, handle)?;
        cloud.journal.push(SimulatedCall::Stop(handle.clone()));
        let (transitional, settled) = self.stopping_states();
        let instance = cloud
            .instances
            .get_mut(handle)
            .ok_or_else(|| ProviderError::NotFound(handle.clone()))?;
        if !instance.info.state.is_stopped() && instance.settling_to != Some(settled) {
            self.begin(instance, transitional, settled);
        }
        debug!(handle = %handle, state = %instance.info.state, "simulated stop");
        Ok(true)
    }

    async fn get(&self, handle: &InstanceHandle) -> Result<InstanceInfo> {
        let mut cloud = self.cloud.lock();
        self.check_failing(&cloud, handle)?;
        let instance = cloud
            .instances
            .get_mut(handle)
            .ok_or_else(|| ProviderError::NotFound(handle.clone()))?;
        if let Some(target) = instance.settling_to {
            if instance.remaining_polls == 0 {
                instance.info.state = target;
                instance.settling_to = None;
            } else {
                instance.remaining_polls -= 1;
            }
        }
        let info = instance.info.clone();
        cloud
            .journal
            .push(SimulatedCall::Get(handle.clone(), info.state));
        Ok(info)
    }
}
