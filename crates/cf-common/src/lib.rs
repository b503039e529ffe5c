//! ---
//! cf_section: "01-core-functionality"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Shared primitives and utilities for the failover runtime."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
//! Shared primitives for the cloud failover workspace.
//! This crate exposes configuration loading, tracing setup, and the small
//! time helpers consumed by the engine and its collaborators.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, AwsConfig, AzureConfig, FailoverConfig, GcpConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, Mode, PoolConfig, ProvidersConfig, RoutingConfig, SimulatedInstanceConfig,
    SimulationConfig, StorageBackend, StorageConfig,
};
pub use logging::{init_tracing, LogFormat};
