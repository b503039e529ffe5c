//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Uniform instance management across cloud providers."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
//! Provider-tagged instance handles, the adapter contract every cloud
//! integration satisfies, and the [`MultiProvider`] facade that dispatches on
//! the handle's provider tag.

pub mod adapter;
pub mod adapters;
pub mod error;
pub mod facade;
pub mod handle;
pub mod instance;
pub mod poll;

pub use adapter::{ProviderAdapter, DEFAULT_POLL_INTERVAL};
pub use adapters::simulated::{SimulatedAdapter, SimulatedCall};
pub use error::{ProviderError, Result};
pub use facade::MultiProvider;
pub use handle::{InstanceHandle, Provider};
pub use instance::{CreateInstanceRequest, InstanceInfo, InstanceState};
pub use poll::poll_until;
