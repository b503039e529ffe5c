//! ---
//! cf_section: "07-resilience-fault-tolerance"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Failover decision engine."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
//! Combines provider-reported instance state, cluster priorities, and proxied
//! request latency to decide which member serves traffic, then drives the
//! start, repoint, stop sequence that moves traffic without a gap.

pub mod engine;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod response_time;
pub mod selection;
mod transition;

pub use engine::{FailoverEngine, SampleOutcome};
pub use error::{EngineError, Result};
pub use metrics::FailoverMetrics;
pub use registry::ClusterRegistry;
pub use response_time::ResponseTimeInfo;
pub use selection::top_two;
