//! ---
//! cf_section: "07-resilience-fault-tolerance"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Start, repoint, stop sequence moving traffic between members."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use cf_cluster::{Cluster, ClusterId, ClusterState};
use cf_providers::{InstanceHandle, InstanceState};
use futures::future::try_join_all;
use tracing::{debug, error, info, warn};

use crate::engine::EngineInner;
use crate::error::{EngineError, Result};
use crate::registry::ClusterSlot;

/// Members to bring up and members to bring down for one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TransitionPlan {
    to_start: Vec<InstanceHandle>,
    to_stop: Vec<InstanceHandle>,
}

impl EngineInner {
    /// Issue start requests for the selection, then hand the wait, repoint and
    /// stop phase to a background task.
    ///
    /// The caller holds the cluster lock. A previous transition still in
    /// flight is aborted.
    pub(crate) async fn transition(
        self: &Arc<Self>,
        slot: &Arc<ClusterSlot>,
        cluster: &mut Cluster,
    ) -> Result<()> {
        let Some(plan) = self.plan(cluster).await? else {
            warn!(cluster = %cluster.id, "no access instance selected, nothing to transition");
            return Ok(());
        };
        info!(
            cluster = %cluster.id,
            to_start = ?plan.to_start,
            to_stop = ?plan.to_stop,
            "transition started"
        );

        self.repository
            .set_state(cluster.id, ClusterState::Transitioning)
            .await?;
        cluster.state = ClusterState::Transitioning;
        self.with_metrics(|m| m.record_transition("started"));

        for handle in &plan.to_start {
            self.providers.start(handle).await?;
        }

        let engine = Arc::clone(self);
        let task_slot = Arc::clone(slot);
        let snapshot = cluster.clone();
        let task = tokio::spawn(async move {
            let id = snapshot.id;
            let result = Arc::clone(&engine).complete(&task_slot, snapshot, plan).await;
            if let Err(err) = &result {
                error!(cluster = %id, error = %err, "transition failed");
                engine.with_metrics(|m| m.record_transition("failed"));
            }
            result
        });
        if slot.replace_transition(task) {
            info!(cluster = %cluster.id, "superseded in-flight transition");
            self.with_metrics(|m| m.record_transition("superseded"));
        }
        Ok(())
    }

    /// Access plus, with hot backup, the backup go up; every other member not
    /// already stopped or stopping goes down.
    async fn plan(&self, cluster: &Cluster) -> Result<Option<TransitionPlan>> {
        let Some(access) = cluster.access_instance().cloned() else {
            return Ok(None);
        };
        let mut to_start = vec![access];
        if cluster.enable_hot_backup {
            if let Some(backup) = cluster.backup_instance() {
                to_start.push(backup.clone());
            }
        }

        let others: Vec<InstanceHandle> = cluster
            .handles()
            .into_iter()
            .filter(|handle| !to_start.contains(handle))
            .collect();
        let mut observed = self.providers.get_many(&others).await;
        let mut to_stop = Vec::new();
        for handle in others {
            match observed.remove(&handle) {
                Some(Ok(info)) if info.state.is_stopped_or_stopping() => {}
                Some(Ok(_)) => to_stop.push(handle),
                Some(Err(err)) if err.is_not_found() => {
                    debug!(cluster = %cluster.id, handle = %handle, "member vanished, not stopping it");
                }
                Some(Err(err)) => return Err(err.into()),
                None => {}
            }
        }
        Ok(Some(TransitionPlan { to_start, to_stop }))
    }

    /// Wait for the new selection, repoint the route, then stop the rest.
    async fn complete(
        self: Arc<Self>,
        slot: &ClusterSlot,
        cluster: Cluster,
        plan: TransitionPlan,
    ) -> Result<()> {
        let started = Instant::now();
        let id = cluster.id;
        let timeout = self.tuning().state_timeout;

        let providers = &self.providers;
        try_join_all(plan.to_start.iter().map(|handle| async move {
            let reached = providers
                .wait_for_state(handle, InstanceState::Running, timeout)
                .await?;
            expect_reached(id, handle, reached, "RUNNING", timeout)
        }))
        .await?;

        let route = self.publish(&cluster).await?;
        info!(cluster = %id, target = %route.target, "traffic repointed");

        for handle in &plan.to_stop {
            self.providers.stop(handle).await?;
        }
        try_join_all(plan.to_stop.iter().map(|handle| async move {
            let reached = providers
                .wait_until(handle, |state| state.is_stopped(), timeout)
                .await?;
            expect_reached(id, handle, reached, "a stopped state", timeout)
        }))
        .await?;

        let settled = self
            .repository
            .compare_and_set_state(id, ClusterState::Transitioning, ClusterState::Operational)
            .await?;
        if !settled {
            debug!(cluster = %id, "cluster state moved on during transition, leaving it");
        }
        slot.stats.lock().last_transition = Some(Instant::now());

        let elapsed = started.elapsed();
        self.with_metrics(|m| {
            m.record_transition("completed");
            m.observe_transition_duration(elapsed.as_secs_f64());
        });
        info!(cluster = %id, elapsed_ms = elapsed.as_millis() as u64, "transition completed");
        Ok(())
    }
}

fn expect_reached(
    cluster: ClusterId,
    handle: &InstanceHandle,
    reached: bool,
    target: &str,
    timeout: Duration,
) -> Result<()> {
    if reached {
        Ok(())
    } else {
        Err(EngineError::Transition {
            cluster,
            reason: format!("{handle} did not reach {target} within {timeout:?}"),
        })
    }
}
