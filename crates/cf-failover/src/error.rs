//! ---
//! cf_section: "07-resilience-fault-tolerance"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Failover decision engine."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use cf_cluster::{ClusterError, ClusterId, RepositoryError};
use cf_providers::{InstanceHandle, ProviderError};
use cf_routing::RoutingError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    /// The cluster exists in storage but the engine holds no lock for it.
    #[error("cluster {0} is not registered with the engine")]
    Concurrency(ClusterId),
    #[error("instance {handle} is not a member of cluster {cluster}")]
    MembershipNotFound {
        cluster: ClusterId,
        handle: InstanceHandle,
    },
    #[error("transition of cluster {cluster} failed: {reason}")]
    Transition { cluster: ClusterId, reason: String },
}

impl EngineError {
    pub fn is_cluster_not_found(&self) -> bool {
        matches!(self, EngineError::Repository(RepositoryError::NotFound(_)))
    }
}
