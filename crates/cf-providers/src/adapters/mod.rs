//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Provider-specific adapters and their native state mapping."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
//! Each cloud adapter talks to its SDK through a narrow async trait and maps
//! the native status vocabulary onto [`InstanceState`](crate::InstanceState).
//! The SDK bindings themselves live outside this crate.

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod simulated;

pub use aws::{AwsAdapter, Ec2Api};
pub use azure::{AzureAdapter, AzureComputeApi};
pub use gcp::{ComputeApi, GcpAdapter};
pub use simulated::{SimulatedAdapter, SimulatedCall};
