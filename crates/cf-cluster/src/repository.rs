//! ---
//! cf_section: "03-persistence-logging"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Cluster repository contract and in-memory store."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{RepositoryError, Result};
use crate::model::{Cluster, ClusterId, ClusterState};

/// Document store for clusters.
///
/// `save` writes every field except `state` of an already stored record; the
/// state only changes through [`set_state`](ClusterRepository::set_state) and
/// [`compare_and_set_state`](ClusterRepository::compare_and_set_state). A new
/// record is stored with the state it carries.
#[async_trait]
pub trait ClusterRepository: Send + Sync {
    /// Every stored cluster.
    async fn load_all(&self) -> Result<Vec<Cluster>>;

    /// One cluster, or [`RepositoryError::NotFound`].
    async fn load(&self, id: ClusterId) -> Result<Cluster>;

    /// Insert or update a cluster.
    async fn save(&self, cluster: &Cluster) -> Result<()>;

    /// Remove a cluster. Returns `false` when nothing was stored.
    async fn delete(&self, id: ClusterId) -> Result<bool>;

    /// Unconditionally write the state field.
    async fn set_state(&self, id: ClusterId, state: ClusterState) -> Result<()>;

    /// Write `new` only if the stored state equals `expected`.
    async fn compare_and_set_state(
        &self,
        id: ClusterId,
        expected: ClusterState,
        new: ClusterState,
    ) -> Result<bool>;
}

/// Process-local repository keeping clusters in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryClusterRepository {
    clusters: RwLock<IndexMap<ClusterId, Cluster>>,
}

impl InMemoryClusterRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterRepository for InMemoryClusterRepository {
    async fn load_all(&self) -> Result<Vec<Cluster>> {
        Ok(self.clusters.read().values().cloned().collect())
    }

    async fn load(&self, id: ClusterId) -> Result<Cluster> {
        self.clusters
            .read()
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn save(&self, cluster: &Cluster) -> Result<()> {
        let mut clusters = self.clusters.write();
        let mut record = cluster.clone();
        if let Some(stored) = clusters.get(&cluster.id) {
            record.state = stored.state;
        }
        clusters.insert(cluster.id, record);
        Ok(())
    }

    async fn delete(&self, id: ClusterId) -> Result<bool> {
        Ok(self.clusters.write().shift_remove(&id).is_some())
    }

    async fn set_state(&self, id: ClusterId, state: ClusterState) -> Result<()> {
        let mut clusters = self.clusters.write();
        let stored = clusters.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        stored.state = state;
        Ok(())
    }

    async fn compare_and_set_state(
        &self,
        id: ClusterId,
        expected: ClusterState,
        new: ClusterState,
    ) -> Result<bool> {
        let mut clusters = self.clusters.write();
        let stored = clusters.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        if stored.state != expected {
            return Ok(false);
        }
        stored.state = new;
        Ok(true)
    }
}
