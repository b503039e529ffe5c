//! ---
//! cf_section: "04-configuration"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Configuration model and loader for the failover runtime."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_mode() -> Mode {
    Mode::Production
}

fn default_min_request_count() -> u64 {
    10
}

fn default_response_time_interval() -> Duration {
    Duration::from_millis(2_000)
}

fn default_transition_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_flag_window() -> Duration {
    Duration::from_secs(60)
}

fn default_flag_threshold() -> usize {
    4
}

fn default_anomaly_deviations() -> f64 {
    4.0
}

fn default_state_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_priority() -> i32 {
    1
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_scheme() -> String {
    "http".to_owned()
}

fn default_access_prefix() -> String {
    "/access".to_owned()
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("target/clusters")
}

fn default_max_concurrent_calls() -> usize {
    16
}

fn default_settle_polls() -> u32 {
    1
}

fn default_simulation_poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_simulated_state() -> String {
    "STOPPED".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9899))
}

fn default_enabled() -> bool {
    true
}

/// Primary configuration object for the failover daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "CF_CONFIG";

    /// Load configuration from disk, respecting the `CF_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.failover.validate()?;
        if let Some(gcp) = self.providers.gcp.as_ref().filter(|gcp| gcp.enabled) {
            if gcp.project.trim().is_empty() {
                return Err(anyhow!("providers.gcp.project must be set"));
            }
        }
        if let Some(azure) = self.providers.azure.as_ref().filter(|azure| azure.enabled) {
            if azure.resource_group.trim().is_empty() {
                return Err(anyhow!("providers.azure.resource_group must be set"));
            }
        }
        self.routing.validate()?;
        if self.pool.max_concurrent_calls == 0 {
            return Err(anyhow!("pool.max_concurrent_calls must be greater than zero"));
        }
        if self.mode.is_simulation() {
            for (instance_id, instance) in &self.simulation.instances {
                if instance.region.trim().is_empty() {
                    return Err(anyhow!(
                        "simulated instance '{}' must declare a region",
                        instance_id
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            providers: ProvidersConfig::default(),
            failover: FailoverConfig::default(),
            routing: RoutingConfig::default(),
            storage: StorageConfig::default(),
            pool: PoolConfig::default(),
            simulation: SimulationConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Operating mode for the daemon.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Simulation,
}

impl Mode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Mode::Production),
            "simulation" => Ok(Mode::Simulation),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Per-provider switches. A provider without a section is never configured.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub aws: Option<AwsConfig>,
    #[serde(default)]
    pub gcp: Option<GcpConfig>,
    #[serde(default)]
    pub azure: Option<AzureConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            aws: None,
            gcp: None,
            azure: None,
        }
    }
}

impl ProvidersConfig {
    pub fn aws_enabled(&self) -> bool {
        self.aws.as_ref().is_some_and(|aws| aws.enabled)
    }

    pub fn gcp_enabled(&self) -> bool {
        self.gcp.as_ref().is_some_and(|gcp| gcp.enabled)
    }

    pub fn azure_enabled(&self) -> bool {
        self.azure.as_ref().is_some_and(|azure| azure.enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AwsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Regions to scan when listing. Empty means every region the account reports.
    #[serde(default)]
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GcpConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AzureConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Resource group scanned for listing and used for every handle.
    #[serde(default)]
    pub resource_group: String,
}

/// Tuning for the failover decision engine and its latency detector.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Samples that must be folded in before latency anomalies are flagged.
    #[serde(default = "default_min_request_count")]
    pub min_request_count: u64,
    /// Minimum spacing between two accepted latency samples.
    #[serde(default = "default_response_time_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub response_time_interval: Duration,
    /// Debounce window after a completed transition.
    #[serde(default = "default_transition_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub transition_cooldown: Duration,
    #[serde(default = "default_flag_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub flag_window: Duration,
    /// Demotion fires once the window holds more flags than this.
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: usize,
    #[serde(default = "default_anomaly_deviations")]
    pub anomaly_deviations: f64,
    /// Deadline for each wait-for-state during a transition.
    #[serde(default = "default_state_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub state_timeout: Duration,
    #[serde(default = "default_priority")]
    pub default_priority: i32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            min_request_count: default_min_request_count(),
            response_time_interval: default_response_time_interval(),
            transition_cooldown: default_transition_cooldown(),
            flag_window: default_flag_window(),
            flag_threshold: default_flag_threshold(),
            anomaly_deviations: default_anomaly_deviations(),
            state_timeout: default_state_timeout(),
            default_priority: default_priority(),
        }
    }
}

impl FailoverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.flag_threshold == 0 {
            return Err(anyhow!("failover.flag_threshold must be greater than zero"));
        }
        if !self.anomaly_deviations.is_finite() || self.anomaly_deviations < 0.0 {
            return Err(anyhow!(
                "failover.anomaly_deviations must be a non-negative number"
            ));
        }
        if self.flag_window.is_zero() {
            return Err(anyhow!("failover.flag_window must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_access_prefix")]
    pub access_prefix: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            access_prefix: default_access_prefix(),
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scheme.trim().is_empty() {
            return Err(anyhow!("routing.scheme must not be empty"));
        }
        if !self.access_prefix.starts_with('/') || self.access_prefix.len() < 2 {
            return Err(anyhow!(
                "routing.access_prefix must start with '/' and name a segment, got '{}'",
                self.access_prefix
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            directory: default_storage_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on concurrently running adapter calls.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

/// Seed data for the in-memory provider adapters used in simulation mode.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Polls an instance spends in PENDING/STOPPING before settling.
    #[serde(default = "default_settle_polls")]
    pub settle_polls: u32,
    #[serde(default = "default_simulation_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    /// Instances keyed by instance id.
    #[serde(default)]
    pub instances: IndexMap<String, SimulatedInstanceConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            settle_polls: default_settle_polls(),
            poll_interval: default_simulation_poll_interval(),
            instances: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedInstanceConfig {
    /// Provider tag (`aws`, `gcp`, `azure`).
    pub provider: String,
    pub region: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_simulated_state")]
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
mode = "simulation"

[providers]
poll_interval = 500

[providers.aws]
regions = ["us-east-1", "eu-west-1"]

[providers.gcp]
enabled = false
project = "failover-lab"

[failover]
min_request_count = 0
response_time_interval = 0
transition_cooldown = 30

[routing]
access_prefix = "/access"

[storage]
backend = "json"
directory = "target/test-clusters"

[simulation.instances.i-web-a]
provider = "aws"
region = "us-east-1"
host = "web-a.internal"
"#;

    #[test]
    fn parses_sample_configuration() {
        let config: AppConfig = SAMPLE.parse().unwrap();
        assert!(config.mode.is_simulation());
        assert_eq!(config.providers.poll_interval, Duration::from_millis(500));
        assert!(config.providers.aws_enabled());
        assert!(!config.providers.gcp_enabled());
        assert!(!config.providers.azure_enabled());
        assert_eq!(config.failover.min_request_count, 0);
        assert_eq!(config.failover.response_time_interval, Duration::ZERO);
        assert_eq!(config.failover.transition_cooldown, Duration::from_secs(30));
        assert_eq!(config.failover.flag_threshold, 4);
        assert_eq!(config.storage.backend, StorageBackend::Json);
        let instance = &config.simulation.instances["i-web-a"];
        assert_eq!(instance.state, "STOPPED");
        assert_eq!(instance.host.as_deref(), Some("web-a.internal"));
    }

    #[test]
    fn defaults_match_documented_tuning() {
        let config = AppConfig::default();
        assert_eq!(config.failover.min_request_count, 10);
        assert_eq!(
            config.failover.response_time_interval,
            Duration::from_millis(2_000)
        );
        assert_eq!(config.failover.transition_cooldown, Duration::from_secs(300));
        assert_eq!(config.failover.flag_window, Duration::from_secs(60));
        assert_eq!(config.providers.poll_interval, Duration::from_secs(2));
        assert_eq!(config.routing.access_prefix, "/access");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_pool_and_bad_prefix() {
        let mut config = AppConfig::default();
        config.pool.max_concurrent_calls = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.routing.access_prefix = "access".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.failover.flag_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_clouds_need_their_scope() {
        let mut config = AppConfig::default();
        config.providers.gcp = Some(GcpConfig {
            enabled: true,
            project: " ".into(),
        });
        assert!(config.validate().is_err());

        config.providers.gcp = Some(GcpConfig {
            enabled: false,
            project: String::new(),
        });
        config.providers.azure = Some(AzureConfig {
            enabled: true,
            resource_group: String::new(),
        });
        assert!(config.validate().is_err());

        config.providers.azure = None;
        config.validate().unwrap();
    }

    #[test]
    fn loads_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failover.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert!(loaded.config.mode.is_simulation());
    }
}
