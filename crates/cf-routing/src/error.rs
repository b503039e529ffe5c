//! ---
//! cf_section: "05-routing"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Dynamic routing contract between the engine and the proxy."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use cf_cluster::ClusterId;
use cf_providers::{InstanceHandle, InstanceState, ProviderError};

pub type Result<T> = std::result::Result<T, RoutingError>;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("cluster {0} has no access instance")]
    NoAccessInstance(ClusterId),
    #[error("access instance {handle} is {state}, not RUNNING")]
    NotRunning {
        handle: InstanceHandle,
        state: InstanceState,
    },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("invalid forwarding target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },
}
