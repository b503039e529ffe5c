//! ---
//! cf_section: "01-core-functionality"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Cluster aggregate and persistence contract."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
//! The persisted cluster aggregate with its membership invariants, and the
//! repository contract the engine stores clusters through.
#![warn(missing_docs)]

pub mod error;
pub mod json;
pub mod model;
pub mod repository;

pub use error::{ClusterError, RepositoryError, Result};
pub use json::JsonFileClusterRepository;
pub use model::{Cluster, ClusterId, ClusterMembership, ClusterSpec, ClusterState, ClusterUpdate};
pub use repository::{ClusterRepository, InMemoryClusterRepository};
