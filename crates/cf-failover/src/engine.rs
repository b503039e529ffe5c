//! ---
//! cf_section: "07-resilience-fault-tolerance"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Cluster service surface and failover state machine."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cf_cluster::{
    Cluster, ClusterError, ClusterId, ClusterMembership, ClusterRepository, ClusterSpec,
    ClusterState, ClusterUpdate,
};
use cf_common::time::{duration_to_millis_f64, has_elapsed};
use cf_common::FailoverConfig;
use cf_providers::{InstanceHandle, InstanceInfo, MultiProvider};
use cf_routing::{access_path, DynamicRouter, RouteEntry};
use futures::future::try_join_all;
use parking_lot::RwLock;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::metrics::FailoverMetrics;
use crate::registry::{ClusterRegistry, ClusterSlot, TaskHandle};
use crate::response_time::ResponseTimeInfo;
use crate::selection::top_two;

/// How a proxied response time sample was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Folded into the estimator.
    Accepted,
    /// Folded in and flagged as anomalous; `demotion` is set when it fired one.
    Flagged { demotion: bool },
    /// Arrived before the sampling interval elapsed.
    RateLimited,
    /// Another sample was being folded in at the same moment.
    Contended,
    /// No cluster is registered under the id, or the path carries none.
    UnknownCluster,
}

pub(crate) struct EngineInner {
    pub(crate) providers: Arc<MultiProvider>,
    pub(crate) repository: Arc<dyn ClusterRepository>,
    pub(crate) router: DynamicRouter,
    pub(crate) registry: ClusterRegistry,
    /// Serializes the cross-cluster uniqueness check with the write that depends on it.
    membership_lock: tokio::sync::Mutex<()>,
    tuning: RwLock<FailoverConfig>,
    pub(crate) metrics: Option<FailoverMetrics>,
}

/// Failover decision engine and the cluster operations built on it.
///
/// Every mutating operation runs under the cluster's lock. The wait, repoint
/// and stop phase of a transition runs as a tracked background task that does
/// not hold the lock.
#[derive(Clone)]
pub struct FailoverEngine {
    inner: Arc<EngineInner>,
}

pub struct FailoverEngineBuilder {
    providers: Arc<MultiProvider>,
    repository: Arc<dyn ClusterRepository>,
    router: DynamicRouter,
    tuning: FailoverConfig,
    metrics: Option<FailoverMetrics>,
}

impl FailoverEngineBuilder {
    pub fn tuning(mut self, tuning: FailoverConfig) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn metrics(mut self, metrics: FailoverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> FailoverEngine {
        FailoverEngine {
            inner: Arc::new(EngineInner {
                providers: self.providers,
                repository: self.repository,
                router: self.router,
                registry: ClusterRegistry::new(),
                membership_lock: tokio::sync::Mutex::new(()),
                tuning: RwLock::new(self.tuning),
                metrics: self.metrics,
            }),
        }
    }
}

impl FailoverEngine {
    pub fn builder(
        providers: Arc<MultiProvider>,
        repository: Arc<dyn ClusterRepository>,
        router: DynamicRouter,
    ) -> FailoverEngineBuilder {
        FailoverEngineBuilder {
            providers,
            repository,
            router,
            tuning: FailoverConfig::default(),
            metrics: None,
        }
    }

    pub fn tuning(&self) -> FailoverConfig {
        self.inner.tuning()
    }

    /// Replace the detector and cooldown tuning; applies to the next decision.
    pub fn set_tuning(&self, tuning: FailoverConfig) {
        *self.inner.tuning.write() = tuning;
    }

    pub fn router(&self) -> &DynamicRouter {
        &self.inner.router
    }

    pub fn providers(&self) -> &Arc<MultiProvider> {
        &self.inner.providers
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.inner.registry
    }

    /// Register every stored cluster and rebuild routes best-effort.
    ///
    /// Returns the number of clusters found.
    pub async fn startup(&self) -> Result<usize> {
        let stored = self.inner.repository.load_all().await?;
        for cluster in &stored {
            self.inner.registry.insert(cluster.id);
        }
        let clusters = self.list_clusters().await?;
        let routes = self.inner.router.rebuild(&clusters).await;
        self.inner.observe_routes();
        info!(clusters = clusters.len(), routes, "failover engine started");
        Ok(clusters.len())
    }

    /// Abort every background task.
    pub fn shutdown(&self) {
        for id in self.inner.registry.ids() {
            if let Some(slot) = self.inner.registry.get(id) {
                slot.abort_tasks();
            }
        }
        info!("failover engine stopped");
    }

    /// All clusters, each reconciled against live provider state.
    ///
    /// A cluster deleted while the listing runs is left out.
    pub async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let stored = self.inner.repository.load_all().await?;
        let reconciled = try_join_all(stored.into_iter().map(|cluster| async move {
            match self.inner.reconcile(cluster).await {
                Ok(cluster) => Ok(Some(cluster)),
                Err(err) if err.is_cluster_not_found() => Ok(None),
                Err(err) => Err(err),
            }
        }))
        .await?;
        Ok(reconciled.into_iter().flatten().collect())
    }

    /// One cluster, reconciled against live provider state.
    pub async fn get_cluster(&self, id: ClusterId) -> Result<Cluster> {
        self.inner.get_cluster(id).await
    }

    pub async fn create_cluster(&self, spec: ClusterSpec) -> Result<Cluster> {
        let inner = &self.inner;
        let default_priority = inner.tuning().default_priority;
        let mut cluster = Cluster::new(spec.name);
        cluster.target_port = spec.target_port;
        cluster.target_path = spec.target_path;
        cluster.enable_instance_state_management = spec.enable_instance_state_management;
        cluster.enable_hot_backup = spec.enable_hot_backup;
        cluster.enable_automatic_priority_adjustment = spec.enable_automatic_priority_adjustment;

        let slot = inner.registry.insert(cluster.id);
        let _guard = slot.lock.lock().await;
        {
            let _members = inner.membership_lock.lock().await;
            let in_use = match inner.used_instances().await {
                Ok(in_use) => in_use,
                Err(err) => {
                    inner.registry.remove(cluster.id);
                    return Err(err);
                }
            };
            for (handle, priority) in spec.members {
                if in_use.contains(&handle) {
                    warn!(handle = %handle, "instance already belongs to another cluster, skipping");
                    continue;
                }
                cluster.add_membership(handle, priority.unwrap_or(default_priority));
            }
            if cluster.member_count() > 0 {
                cluster.state = ClusterState::Operational;
            }
            if let Err(err) = inner.repository.save(&cluster).await {
                inner.registry.remove(cluster.id);
                return Err(err.into());
            }
        }
        info!(cluster = %cluster.id, name = %cluster.name, members = cluster.member_count(), "cluster created");
        inner.manage(&slot, &mut cluster, true).await?;
        Ok(cluster)
    }

    pub async fn update_cluster(&self, id: ClusterId, update: ClusterUpdate) -> Result<Cluster> {
        let inner = &self.inner;
        let slot = inner.slot(id).await?;
        let _guard = slot.lock.lock().await;
        let mut cluster = inner.load_locked(id).await?;

        if let Some(name) = &update.name {
            cluster.name = name.clone();
        }
        if let Some(port) = update.target_port {
            cluster.target_port = port;
        }
        if let Some(path) = &update.target_path {
            cluster.target_path = path.clone();
        }
        if let Some(enabled) = update.enable_instance_state_management {
            cluster.enable_instance_state_management = enabled;
        }
        if let Some(enabled) = update.enable_hot_backup {
            cluster.enable_hot_backup = enabled;
        }
        if let Some(enabled) = update.enable_automatic_priority_adjustment {
            cluster.enable_automatic_priority_adjustment = enabled;
        }

        {
            let _members = inner.membership_lock.lock().await;
            if let Some(desired) = &update.instances {
                let in_use = inner.used_instances().await?;
                let default_priority = inner.tuning().default_priority;
                for handle in desired {
                    if cluster.has_member(handle) {
                        continue;
                    }
                    if in_use.contains(handle) {
                        warn!(cluster = %id, handle = %handle, "instance already belongs to another cluster, skipping");
                        continue;
                    }
                    cluster.add_membership(handle.clone(), default_priority);
                }
                for handle in cluster.handles() {
                    if !desired.contains(&handle) {
                        cluster.remove_membership(&handle);
                    }
                }
            }
            if update.selects_explicitly() {
                let access = update
                    .access_instance
                    .clone()
                    .or_else(|| cluster.access_instance().cloned());
                let backup = match &update.backup_instance {
                    Some(backup) => Some(backup.clone()),
                    None => cluster
                        .backup_instance()
                        .filter(|backup| Some(*backup) != access.as_ref())
                        .cloned(),
                };
                cluster.set_selection(access, backup)?;
            }
            inner.repository.save(&cluster).await?;
        }
        info!(cluster = %id, "cluster updated");

        inner.settle_membership_state(&mut cluster).await?;
        if update.changes_target() && cluster.access_instance().is_some() {
            if let Err(err) = inner.publish(&cluster).await {
                warn!(cluster = %id, error = %err, "route not refreshed after target change");
            }
        }
        inner.manage(&slot, &mut cluster, !update.selects_explicitly()).await?;
        inner.drop_route_if_unselected(&cluster);
        Ok(cluster)
    }

    /// Add `handle` with the configured default priority.
    pub async fn add_instance(&self, id: ClusterId, handle: InstanceHandle) -> Result<Cluster> {
        self.add_instance_with_priority(id, handle, None).await
    }

    /// Add `handle`; a handle owned by another cluster is refused with a warning.
    pub async fn add_instance_with_priority(
        &self,
        id: ClusterId,
        handle: InstanceHandle,
        priority: Option<i32>,
    ) -> Result<Cluster> {
        let inner = &self.inner;
        let slot = inner.slot(id).await?;
        let _guard = slot.lock.lock().await;
        let mut cluster = inner.load_locked(id).await?;
        if cluster.has_member(&handle) {
            debug!(cluster = %id, handle = %handle, "instance already a member");
            return Ok(cluster);
        }

        {
            let _members = inner.membership_lock.lock().await;
            if inner.used_instances().await?.contains(&handle) {
                warn!(cluster = %id, handle = %handle, "instance already belongs to another cluster, not adding");
                return Ok(cluster);
            }
            let priority = priority.unwrap_or_else(|| inner.tuning().default_priority);
            cluster.add_membership(handle.clone(), priority);
            inner.repository.save(&cluster).await?;
        }
        info!(cluster = %id, handle = %handle, "instance added");

        inner.settle_membership_state(&mut cluster).await?;
        inner.manage(&slot, &mut cluster, true).await?;
        Ok(cluster)
    }

    pub async fn remove_instance(&self, id: ClusterId, handle: &InstanceHandle) -> Result<Cluster> {
        let inner = &self.inner;
        let slot = inner.slot(id).await?;
        let _guard = slot.lock.lock().await;
        let mut cluster = inner.load_locked(id).await?;
        if !cluster.remove_membership(handle) {
            debug!(cluster = %id, handle = %handle, "instance was not a member");
            return Ok(cluster);
        }
        inner.repository.save(&cluster).await?;
        info!(cluster = %id, handle = %handle, "instance removed");

        inner.settle_membership_state(&mut cluster).await?;
        inner.manage(&slot, &mut cluster, true).await?;
        inner.drop_route_if_unselected(&cluster);
        Ok(cluster)
    }

    /// Switch traffic to `handle`, which must be a running member.
    pub async fn set_access_instance(&self, id: ClusterId, handle: InstanceHandle) -> Result<Cluster> {
        let inner = &self.inner;
        let slot = inner.slot(id).await?;
        let _guard = slot.lock.lock().await;
        let mut cluster = inner.load_locked(id).await?;
        if !cluster.has_member(&handle) {
            return Err(EngineError::MembershipNotFound {
                cluster: id,
                handle,
            });
        }
        let backup = cluster
            .backup_instance()
            .filter(|backup| **backup != handle)
            .cloned();
        cluster.set_selection(Some(handle.clone()), backup)?;
        inner.publish(&cluster).await?;
        inner.repository.save(&cluster).await?;
        info!(cluster = %id, handle = %handle, "access instance set");
        Ok(cluster)
    }

    /// Delete a cluster, its route, and any in-flight transition.
    ///
    /// Returns `false` for an unknown id.
    pub async fn delete_cluster(&self, id: ClusterId) -> Result<bool> {
        let inner = &self.inner;
        let slot = match inner.slot(id).await {
            Ok(slot) => slot,
            Err(err) if err.is_cluster_not_found() => return Ok(false),
            Err(err) => return Err(err),
        };
        let _guard = slot.lock.lock().await;
        let deleted = inner.repository.delete(id).await?;
        slot.abort_tasks();
        inner.unpublish(id);
        inner.registry.remove(id);
        if deleted {
            info!(cluster = %id, "cluster deleted");
        }
        Ok(deleted)
    }

    /// Every handle that is a member of some cluster.
    pub async fn used_instances(&self) -> Result<HashSet<InstanceHandle>> {
        self.inner.used_instances().await
    }

    pub async fn edit_membership(
        &self,
        id: ClusterId,
        handle: &InstanceHandle,
        priority: i32,
    ) -> Result<ClusterMembership> {
        let inner = &self.inner;
        let slot = inner.slot(id).await?;
        let _guard = slot.lock.lock().await;
        let mut cluster = inner.load_locked(id).await?;
        let membership = cluster
            .set_priority(handle, priority)
            .map_err(|err| match err {
                ClusterError::NotAMember(handle) => EngineError::MembershipNotFound { cluster: id, handle },
                other => other.into(),
            })?
            .clone();
        inner.repository.save(&cluster).await?;
        info!(cluster = %id, handle = %handle, priority, "membership priority changed");
        Ok(membership)
    }

    /// Record the elapsed time of one proxied request.
    ///
    /// Never blocks: a sample that arrives while another one is being folded in
    /// is dropped. Must be called from within a Tokio runtime since a demotion
    /// runs as a spawned task.
    pub fn add_response_time(&self, id: ClusterId, elapsed: Duration) -> SampleOutcome {
        let inner = &self.inner;
        let Some(slot) = inner.registry.get(id) else {
            return SampleOutcome::UnknownCluster;
        };
        let tuning = inner.tuning();
        let now = Instant::now();
        let verdict = {
            let Some(mut stats) = slot.stats.try_lock() else {
                inner.with_metrics(|m| m.record_sample("contended"));
                return SampleOutcome::Contended;
            };
            if !has_elapsed(stats.last_update, tuning.response_time_interval, now) {
                inner.with_metrics(|m| m.record_sample("rate_limited"));
                return SampleOutcome::RateLimited;
            }
            let verdict = stats.record(duration_to_millis_f64(elapsed), now, &tuning);
            debug!(
                cluster = %id,
                requests = stats.request_count,
                rtt = stats.rtt,
                rtt_var = stats.rtt_var,
                flagged = verdict.flagged,
                "response time recorded"
            );
            verdict
        };
        inner.with_metrics(|m| m.record_sample("accepted"));

        if !verdict.flagged {
            return SampleOutcome::Accepted;
        }
        inner.with_metrics(FailoverMetrics::record_flag);
        if verdict.demote {
            info!(cluster = %id, "anomalous response times, demoting access instance");
            inner.spawn_demotion(id, &slot);
        }
        SampleOutcome::Flagged {
            demotion: verdict.demote,
        }
    }

    /// Flag one failed proxied request. Returns `true` when it fired a demotion.
    pub fn flag_request(&self, id: ClusterId) -> bool {
        let inner = &self.inner;
        let Some(slot) = inner.registry.get(id) else {
            debug!(cluster = %id, "flag for unknown cluster ignored");
            return false;
        };
        let tuning = inner.tuning();
        let demote = slot
            .stats
            .lock()
            .flag(Instant::now(), tuning.flag_window, tuning.flag_threshold);
        inner.with_metrics(FailoverMetrics::record_flag);
        if demote {
            info!(cluster = %id, "request failures piled up, demoting access instance");
            inner.spawn_demotion(id, &slot);
        }
        demote
    }

    /// [`add_response_time`](Self::add_response_time) keyed by a proxied request path.
    pub fn observe_response(&self, request_path: &str, elapsed: Duration) -> SampleOutcome {
        let prefix = self.inner.router.table().access_prefix();
        match access_path::cluster_id(request_path, prefix) {
            Some(id) => self.add_response_time(id, elapsed),
            None => SampleOutcome::UnknownCluster,
        }
    }

    /// [`flag_request`](Self::flag_request) keyed by a proxied request path.
    pub fn observe_failure(&self, request_path: &str) -> bool {
        let prefix = self.inner.router.table().access_prefix();
        access_path::cluster_id(request_path, prefix)
            .map(|id| self.flag_request(id))
            .unwrap_or(false)
    }

    /// Copy of the cluster's latency statistics.
    pub async fn response_time_info(&self, id: ClusterId) -> Result<ResponseTimeInfo> {
        Ok(self.inner.slot(id).await?.response_time_info())
    }

    /// Live description of the cluster's access instance.
    pub async fn current_access(&self, id: ClusterId) -> Result<Option<InstanceInfo>> {
        let cluster = self.inner.get_cluster(id).await?;
        match cluster.access_instance() {
            Some(access) => Ok(Some(self.inner.providers.get(access).await?)),
            None => Ok(None),
        }
    }

    /// Wait for a pending demotion and the latest transition of the cluster.
    pub async fn await_transition(&self, id: ClusterId) -> Result<()> {
        let slot = self.inner.slot(id).await?;
        let demotion = slot.demotion.lock().take();
        if let Some(task) = demotion {
            join_task(id, task).await?;
        }
        let transition = slot.transition.lock().take();
        if let Some(task) = transition {
            join_task(id, task).await?;
        }
        Ok(())
    }
}

async fn join_task(cluster: ClusterId, task: TaskHandle) -> Result<()> {
    task.await.unwrap_or_else(|err: JoinError| {
        let reason = if err.is_cancelled() {
            "superseded or cancelled".to_owned()
        } else {
            err.to_string()
        };
        Err(EngineError::Transition { cluster, reason })
    })
}

impl std::fmt::Debug for FailoverEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverEngine")
            .field("providers", &self.inner.providers)
            .field("clusters", &self.inner.registry.len())
            .field("routes", &self.inner.router.table().len())
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    pub(crate) fn tuning(&self) -> FailoverConfig {
        self.tuning.read().clone()
    }

    pub(crate) fn with_metrics(&self, record: impl FnOnce(&FailoverMetrics)) {
        if let Some(metrics) = &self.metrics {
            record(metrics);
        }
    }

    /// The cluster's slot; an id missing from the registry is either unknown or a lifecycle bug.
    async fn slot(&self, id: ClusterId) -> Result<Arc<ClusterSlot>> {
        if let Some(slot) = self.registry.get(id) {
            return Ok(slot);
        }
        self.repository.load(id).await?;
        Err(EngineError::Concurrency(id))
    }

    async fn get_cluster(&self, id: ClusterId) -> Result<Cluster> {
        let cluster = self.repository.load(id).await?;
        self.reconcile(cluster).await
    }

    /// Load and reconcile a cluster whose lock the caller already holds.
    async fn load_locked(&self, id: ClusterId) -> Result<Cluster> {
        let cluster = self.repository.load(id).await?;
        let vanished = self.vanished_members(&cluster).await;
        self.prune(cluster, vanished).await
    }

    async fn used_instances(&self) -> Result<HashSet<InstanceHandle>> {
        Ok(self
            .repository
            .load_all()
            .await?
            .iter()
            .flat_map(Cluster::handles)
            .collect())
    }

    /// Drop members whose instance no longer exists.
    ///
    /// Lookups run unlocked on the copy that was read. Pruning takes the
    /// cluster lock and works on a fresh copy, so a write committed meanwhile
    /// is kept and a cluster deleted meanwhile stays deleted.
    async fn reconcile(&self, cluster: Cluster) -> Result<Cluster> {
        let vanished = self.vanished_members(&cluster).await;
        if vanished.is_empty() {
            return Ok(cluster);
        }
        let slot = self.slot(cluster.id).await?;
        let _guard = slot.lock.lock().await;
        let current = self.repository.load(cluster.id).await?;
        let vanished = vanished
            .into_iter()
            .filter(|handle| current.has_member(handle))
            .collect();
        self.prune(current, vanished).await
    }

    /// Members the providers report as gone.
    ///
    /// Only [`NotFound`](cf_providers::ProviderError::NotFound) counts; other
    /// lookup failures are logged and the member kept.
    async fn vanished_members(&self, cluster: &Cluster) -> Vec<InstanceHandle> {
        let handles = cluster.handles();
        if handles.is_empty() {
            return Vec::new();
        }
        let results = self.providers.get_many(&handles).await;
        let mut vanished = Vec::new();
        for handle in handles {
            match results.get(&handle) {
                Some(Err(err)) if err.is_not_found() => vanished.push(handle),
                Some(Err(err)) => {
                    warn!(cluster = %cluster.id, handle = %handle, error = %err, "membership lookup failed");
                }
                _ => {}
            }
        }
        vanished
    }

    /// Remove `vanished` from `cluster` and persist. The caller holds the lock.
    async fn prune(&self, mut cluster: Cluster, vanished: Vec<InstanceHandle>) -> Result<Cluster> {
        if vanished.is_empty() {
            return Ok(cluster);
        }
        let selection_hit = vanished.iter().any(|handle| {
            cluster.access_instance() == Some(handle) || cluster.backup_instance() == Some(handle)
        });
        for handle in &vanished {
            cluster.remove_membership(handle);
            info!(cluster = %cluster.id, handle = %handle, "pruned deleted instance");
        }
        self.with_metrics(|m| m.record_removals(vanished.len()));
        if selection_hit {
            let (access, backup) = top_two(&cluster);
            cluster.set_selection(access, backup)?;
        }
        self.repository.save(&cluster).await?;
        self.settle_membership_state(&mut cluster).await?;

        if selection_hit {
            if cluster.access_instance().is_none() {
                self.unpublish(cluster.id);
            } else if let Err(err) = self.publish(&cluster).await {
                warn!(cluster = %cluster.id, error = %err, "route withdrawn after pruning");
                self.unpublish(cluster.id);
            }
        }
        Ok(cluster)
    }

    /// Move between `NO_INSTANCES` and `OPERATIONAL` as the member count crosses zero.
    async fn settle_membership_state(&self, cluster: &mut Cluster) -> Result<()> {
        if cluster.member_count() == 0 {
            if cluster.state != ClusterState::NoInstances {
                self.repository
                    .set_state(cluster.id, ClusterState::NoInstances)
                    .await?;
                cluster.state = ClusterState::NoInstances;
            }
        } else if self
            .repository
            .compare_and_set_state(cluster.id, ClusterState::NoInstances, ClusterState::Operational)
            .await?
        {
            cluster.state = ClusterState::Operational;
        }
        Ok(())
    }

    /// Recompute the selection if asked, then transition when state management applies.
    pub(crate) async fn manage(
        self: &Arc<Self>,
        slot: &Arc<ClusterSlot>,
        cluster: &mut Cluster,
        recompute: bool,
    ) -> Result<()> {
        if !cluster.enable_instance_state_management || cluster.member_count() == 0 {
            return Ok(());
        }
        let tuning = self.tuning();
        {
            let mut stats = slot.stats.lock();
            if stats.in_cooldown(tuning.transition_cooldown, Instant::now()) {
                debug!(cluster = %cluster.id, "transition cooldown active");
                return Ok(());
            }
            stats.flags.clear();
        }

        if recompute {
            let (access, backup) = top_two(cluster);
            if access.as_ref() == cluster.access_instance()
                && backup.as_ref() == cluster.backup_instance()
            {
                debug!(cluster = %cluster.id, "selection unchanged");
                return Ok(());
            }
            info!(
                cluster = %cluster.id,
                old_access = ?cluster.access_instance(),
                old_backup = ?cluster.backup_instance(),
                new_access = ?access,
                new_backup = ?backup,
                "selection changed"
            );
            cluster.set_selection(access, backup)?;
            self.repository.save(cluster).await?;
        }
        self.transition(slot, cluster).await
    }

    fn spawn_demotion(self: &Arc<Self>, id: ClusterId, slot: &Arc<ClusterSlot>) {
        let engine = Arc::clone(self);
        let task_slot = Arc::clone(slot);
        let task = tokio::spawn(async move {
            let result = engine.demote(&task_slot, id).await;
            if let Err(err) = &result {
                warn!(cluster = %id, error = %err, "demotion failed");
            }
            result
        });
        slot.replace_demotion(task);
    }

    async fn demote(self: &Arc<Self>, slot: &Arc<ClusterSlot>, id: ClusterId) -> Result<()> {
        let _guard = slot.lock.lock().await;
        let mut cluster = self.load_locked(id).await?;
        if cluster.enable_automatic_priority_adjustment {
            if let Some(access) = cluster.access_instance().cloned() {
                if let Some(priority) = cluster.demote(&access) {
                    info!(cluster = %id, handle = %access, priority, "access instance demoted");
                    self.with_metrics(FailoverMetrics::record_demotion);
                }
            }
        }
        self.repository.save(&cluster).await?;
        self.manage(slot, &mut cluster, true).await
    }

    pub(crate) async fn publish(&self, cluster: &Cluster) -> Result<RouteEntry> {
        let entry = self.router.publish(cluster).await?;
        self.observe_routes();
        Ok(entry)
    }

    fn unpublish(&self, id: ClusterId) -> bool {
        let removed = self.router.unpublish(id);
        self.observe_routes();
        removed
    }

    fn drop_route_if_unselected(&self, cluster: &Cluster) {
        if cluster.access_instance().is_none() {
            self.unpublish(cluster.id);
        }
    }

    fn observe_routes(&self) {
        self.with_metrics(|m| m.set_published_routes(self.router.table().len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_cluster::InMemoryClusterRepository;
    use cf_routing::RoutingTable;

    fn idle_engine() -> FailoverEngine {
        let providers = Arc::new(MultiProvider::new(1));
        let router = DynamicRouter::new(
            providers.clone(),
            Arc::new(RoutingTable::new("/access")),
            "http",
        );
        FailoverEngine::builder(providers, Arc::new(InMemoryClusterRepository::new()), router)
            .tuning(FailoverConfig {
                response_time_interval: Duration::ZERO,
                ..FailoverConfig::default()
            })
            .build()
    }

    #[test]
    fn sample_arriving_mid_update_is_dropped() {
        let engine = idle_engine();
        let id = ClusterId::new_v4();
        let slot = engine.registry().insert(id);

        let held = slot.stats.lock();
        assert_eq!(
            engine.add_response_time(id, Duration::from_millis(40)),
            SampleOutcome::Contended
        );
        drop(held);
        assert_eq!(slot.response_time_info().request_count, 0);
        assert_eq!(slot.response_time_info().last_update, None);

        assert_eq!(
            engine.add_response_time(id, Duration::from_millis(40)),
            SampleOutcome::Accepted
        );
        assert_eq!(slot.response_time_info().request_count, 1);
    }

    #[test]
    fn samples_for_unregistered_clusters_are_ignored() {
        let engine = idle_engine();
        assert_eq!(
            engine.add_response_time(ClusterId::new_v4(), Duration::from_millis(5)),
            SampleOutcome::UnknownCluster
        );
        assert_eq!(
            engine.observe_response("/elsewhere/x", Duration::from_millis(5)),
            SampleOutcome::UnknownCluster
        );
    }
}
