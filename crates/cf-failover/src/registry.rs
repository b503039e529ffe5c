//! ---
//! cf_section: "07-resilience-fault-tolerance"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Per-cluster lock, statistics, and task registry."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use cf_cluster::ClusterId;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Result;
use crate::response_time::ResponseTimeInfo;

pub(crate) type TaskHandle = JoinHandle<Result<()>>;

/// Engine-owned state of one cluster.
#[derive(Debug, Default)]
pub struct ClusterSlot {
    /// Serializes every mutating entry point for the cluster.
    pub(crate) lock: tokio::sync::Mutex<()>,
    pub(crate) stats: Mutex<ResponseTimeInfo>,
    pub(crate) transition: Mutex<Option<TaskHandle>>,
    pub(crate) demotion: Mutex<Option<TaskHandle>>,
}

impl ClusterSlot {
    /// Track `task` as the cluster's transition, aborting a predecessor still in flight.
    pub(crate) fn replace_transition(&self, task: TaskHandle) -> bool {
        let previous = self.transition.lock().replace(task);
        match previous {
            Some(previous) if !previous.is_finished() => {
                previous.abort();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn replace_demotion(&self, task: TaskHandle) {
        if let Some(previous) = self.demotion.lock().replace(task) {
            if !previous.is_finished() {
                debug!("superseding pending demotion");
            }
        }
    }

    pub(crate) fn abort_tasks(&self) {
        for slot in [&self.demotion, &self.transition] {
            if let Some(task) = slot.lock().take() {
                task.abort();
            }
        }
    }

    pub fn response_time_info(&self) -> ResponseTimeInfo {
        self.stats.lock().clone()
    }
}

/// Registry of [`ClusterSlot`]s, populated at startup and on creation and
/// emptied on deletion.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    slots: RwLock<HashMap<ClusterId, Arc<ClusterSlot>>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`, keeping an existing slot if there is one.
    pub fn insert(&self, id: ClusterId) -> Arc<ClusterSlot> {
        self.slots
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(ClusterSlot::default()))
            .clone()
    }

    pub fn get(&self, id: ClusterId) -> Option<Arc<ClusterSlot>> {
        self.slots.read().get(&id).cloned()
    }

    pub fn remove(&self, id: ClusterId) -> Option<Arc<ClusterSlot>> {
        self.slots.write().remove(&id)
    }

    pub fn contains(&self, id: ClusterId) -> bool {
        self.slots.read().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ClusterId> {
        self.slots.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn insert_is_idempotent() {
        let registry = ClusterRegistry::new();
        let id = ClusterId::new_v4();
        let first = registry.insert(id);
        first.stats.lock().request_count = 7;
        let second = registry.insert(id);
        assert_eq!(second.response_time_info().request_count, 7);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id).is_some());
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn replacing_a_running_transition_aborts_it() {
        let slot = ClusterSlot::default();
        let slow: TaskHandle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        assert!(!slot.replace_transition(slow));
        let quick: TaskHandle = tokio::spawn(async { Ok(()) });
        assert!(slot.replace_transition(quick));

        let current = slot.transition.lock().take().unwrap();
        assert!(current.await.unwrap().is_ok());
    }
}
