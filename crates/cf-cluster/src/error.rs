//! ---
//! cf_section: "01-core-functionality"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Cluster aggregate and persistence contract."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use cf_providers::InstanceHandle;

use crate::model::ClusterId;

/// Result alias used by repositories.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Violations of the cluster aggregate's invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// The handle is not a member of the cluster.
    #[error("instance {0} is not a member of the cluster")]
    NotAMember(InstanceHandle),
    /// A backup was selected while no access instance is set.
    #[error("a backup instance requires an access instance")]
    BackupWithoutAccess,
    /// Access and backup must be distinct members.
    #[error("access and backup must be different instances")]
    DuplicateSelection,
}

/// Error type for cluster repositories.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// No cluster is stored under the id.
    #[error("cluster {0} not found")]
    NotFound(ClusterId),
    /// Wrapper for IO errors encountered while reading/writing cluster files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A stored record violates the aggregate invariants.
    #[error("stored cluster {id} is invalid: {source}")]
    Corrupt {
        /// Offending cluster.
        id: ClusterId,
        /// Violated invariant.
        source: ClusterError,
    },
}
