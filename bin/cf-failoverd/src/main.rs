//! ---
//! cf_section: "01-core-functionality"
//! cf_subsection: "binary"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Binary entrypoint for the failover daemon."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cf_cluster::{ClusterRepository, InMemoryClusterRepository, JsonFileClusterRepository};
use cf_common::config::{AppConfig, Mode, StorageBackend, StorageConfig};
use cf_common::logging::init_tracing;
use cf_failover::{FailoverEngine, FailoverMetrics};
use cf_metrics::{new_registry, spawn_http_server, DaemonMetrics};
use cf_providers::adapters::{AwsAdapter, AzureAdapter, AzureComputeApi, ComputeApi, Ec2Api, GcpAdapter};
use cf_providers::{InstanceState, MultiProvider, Provider, ProviderAdapter, SimulatedAdapter};
use cf_routing::{DynamicRouter, RoutingTable};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_CARGO_TARGET_TRIPLE"), ")"),
    about = "Multi-cloud instance failover daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override application mode")]
    mode: Option<CliMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Production,
    Simulation,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Production => Mode::Production,
            CliMode::Simulation => Mode::Simulation,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the failover engine until interrupted")]
    Run,
    #[command(about = "Validate the configuration and print a summary")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
        config.validate()?;
    }
    let load_duration = load_started.elapsed();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, &loaded.source, load_duration).await,
        Commands::CheckConfig => {
            print_summary(&config, &loaded.source);
            Ok(())
        }
    }
}

async fn run_daemon(config: AppConfig, source: &Path, load_duration: Duration) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(
        env!("CARGO_PKG_VERSION"),
        env!("VERGEN_CARGO_TARGET_TRIPLE"),
        mode_name(config.mode),
    );

    init_tracing("cf-failoverd", &config.logging)?;
    info!(config_path = %source.display(), mode = mode_name(config.mode), "configuration loaded");

    let providers = Arc::new(build_providers(&config)?);
    info!(providers = ?providers.providers(), "provider adapters ready");
    let repository = open_repository(&config.storage).await?;
    let router = DynamicRouter::new(
        providers.clone(),
        Arc::new(RoutingTable::new(config.routing.access_prefix.clone())),
        config.routing.scheme.clone(),
    );

    let mut builder =
        FailoverEngine::builder(providers, repository, router).tuning(config.failover.clone());
    let metrics_server = if config.metrics.enabled {
        builder = builder.metrics(
            FailoverMetrics::new(daemon_metrics.registry())
                .context("failed to register failover metrics")?,
        );
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(daemon_metrics.registry(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let engine = builder.build();
    let clusters = engine.startup().await?;

    info!(clusters, "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    engine.shutdown();

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn build_providers(config: &AppConfig) -> Result<MultiProvider> {
    let mut providers = MultiProvider::new(config.pool.max_concurrent_calls);
    match config.mode {
        Mode::Simulation => {
            let simulation = &config.simulation;
            let simulated = |provider| {
                Arc::new(
                    SimulatedAdapter::new(provider)
                        .with_settle_polls(simulation.settle_polls)
                        .with_poll_interval(simulation.poll_interval),
                )
            };
            let (aws, gcp, azure) = (
                simulated(Provider::Aws),
                simulated(Provider::Gcp),
                simulated(Provider::Azure),
            );
            for (instance_id, seed) in &simulation.instances {
                let provider: Provider = seed
                    .provider
                    .parse()
                    .with_context(|| format!("simulated instance '{instance_id}'"))?;
                let state: InstanceState = seed
                    .state
                    .parse()
                    .with_context(|| format!("simulated instance '{instance_id}'"))?;
                let host = seed
                    .host
                    .clone()
                    .unwrap_or_else(|| format!("{instance_id}.{}.sim", seed.region));
                let adapter = match provider {
                    Provider::Aws => &aws,
                    Provider::Gcp => &gcp,
                    Provider::Azure => &azure,
                };
                let handle = adapter.seed(instance_id, &seed.region, &host, state);
                debug!(handle = %handle, state = %state, "seeded simulated instance");
            }
            providers.register(aws);
            providers.register(gcp);
            providers.register(azure);
        }
        Mode::Production => {
            let registered = register_cloud_adapters(config, &UnlinkedSdk, &mut providers);
            debug!(registered, "cloud adapters registered");
        }
    }
    Ok(providers)
}

/// Source of cloud SDK clients for production mode.
trait CloudSdk {
    fn ec2(&self) -> Option<Arc<dyn Ec2Api>>;
    /// Compute Engine client scoped to `project`.
    fn compute(&self, project: &str) -> Option<Arc<dyn ComputeApi>>;
    fn azure_compute(&self) -> Option<Arc<dyn AzureComputeApi>>;
}

/// No SDK bindings are linked into this build.
struct UnlinkedSdk;

impl CloudSdk for UnlinkedSdk {
    fn ec2(&self) -> Option<Arc<dyn Ec2Api>> {
        None
    }

    fn compute(&self, _project: &str) -> Option<Arc<dyn ComputeApi>> {
        None
    }

    fn azure_compute(&self) -> Option<Arc<dyn AzureComputeApi>> {
        None
    }
}

/// Register an adapter for every enabled provider the SDK has a client for.
fn register_cloud_adapters(
    config: &AppConfig,
    sdk: &dyn CloudSdk,
    providers: &mut MultiProvider,
) -> usize {
    let poll = config.providers.poll_interval;
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    let mut missing = Vec::new();

    if let Some(aws) = config.providers.aws.as_ref().filter(|aws| aws.enabled) {
        match sdk.ec2() {
            Some(api) => adapters.push(Arc::new(
                AwsAdapter::new(api, aws.regions.clone()).with_poll_interval(poll),
            )),
            None => missing.push(Provider::Aws),
        }
    }
    if let Some(gcp) = config.providers.gcp.as_ref().filter(|gcp| gcp.enabled) {
        match sdk.compute(&gcp.project) {
            Some(api) => adapters.push(Arc::new(GcpAdapter::new(api).with_poll_interval(poll))),
            None => missing.push(Provider::Gcp),
        }
    }
    if let Some(azure) = config.providers.azure.as_ref().filter(|azure| azure.enabled) {
        match sdk.azure_compute() {
            Some(api) => adapters.push(Arc::new(
                AzureAdapter::new(api, azure.resource_group.clone()).with_poll_interval(poll),
            )),
            None => missing.push(Provider::Azure),
        }
    }

    for provider in missing {
        warn!(
            provider = %provider,
            "no cloud SDK binding is linked into this build; provider stays uninitialised"
        );
    }
    let registered = adapters.len();
    for adapter in adapters {
        providers.register(adapter);
    }
    registered
}

async fn open_repository(storage: &StorageConfig) -> Result<Arc<dyn ClusterRepository>> {
    match storage.backend {
        StorageBackend::Memory => {
            warn!("cluster storage is in memory; clusters are lost on restart");
            Ok(Arc::new(InMemoryClusterRepository::new()))
        }
        StorageBackend::Json => {
            let repository = JsonFileClusterRepository::open(storage.directory.clone())
                .await
                .with_context(|| {
                    format!("unable to open cluster store {}", storage.directory.display())
                })?;
            info!(directory = %storage.directory.display(), "cluster store opened");
            Ok(Arc::new(repository))
        }
    }
}

fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Production => "production",
        Mode::Simulation => "simulation",
    }
}

fn print_summary(config: &AppConfig, source: &Path) {
    let enabled: Vec<&str> = [
        ("aws", config.providers.aws_enabled()),
        ("gcp", config.providers.gcp_enabled()),
        ("azure", config.providers.azure_enabled()),
    ]
    .into_iter()
    .filter_map(|(name, enabled)| enabled.then_some(name))
    .collect();
    let failover = &config.failover;
    println!("Configuration: {}", source.display());
    println!("Mode: {}", mode_name(config.mode));
    println!("Providers: {}", if enabled.is_empty() { "none".to_owned() } else { enabled.join(", ") });
    println!("Simulated instances: {}", config.simulation.instances.len());
    println!(
        "Failover: min_request_count={} interval={:?} cooldown={:?} window={:?} threshold={} k={} state_timeout={:?}",
        failover.min_request_count,
        failover.response_time_interval,
        failover.transition_cooldown,
        failover.flag_window,
        failover.flag_threshold,
        failover.anomaly_deviations,
        failover.state_timeout,
    );
    println!(
        "Routing: {}://<access-host>, prefix {}",
        config.routing.scheme, config.routing.access_prefix
    );
    println!(
        "Storage: {:?} at {}",
        config.storage.backend,
        config.storage.directory.display()
    );
    if config.metrics.enabled {
        println!("Metrics: http://{}/metrics", config.metrics.listen);
    } else {
        println!("Metrics: disabled");
    }
}
