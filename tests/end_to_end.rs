//! ---
//! cf_section: "15-testing-qa-runbook"
//! cf_subsection: "integration-tests"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "End-to-end failover across providers, storage, routing, and metrics."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use cf_cluster::{ClusterSpec, ClusterState, JsonFileClusterRepository};
use cf_common::config::AppConfig;
use cf_failover::{FailoverEngine, FailoverMetrics, SampleOutcome};
use cf_metrics::{encode_text, new_registry, spawn_http_server};
use cf_providers::{InstanceState, MultiProvider, Provider, SimulatedAdapter};
use cf_routing::{DynamicRouter, RoutingTable};
use tempfile::tempdir;

const CONFIG: &str = r#"
mode = "simulation"

[failover]
min_request_count = 0
response_time_interval = 0
transition_cooldown = 0
state_timeout = 10

[storage]
backend = "json"

[simulation]
settle_polls = 2
poll_interval = 5
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cluster_survives_access_loss_and_latency_spike() {
    let config: AppConfig = CONFIG.parse().unwrap();
    let dir = tempdir().unwrap();
    let sim = |provider| {
        Arc::new(
            SimulatedAdapter::new(provider)
                .with_settle_polls(config.simulation.settle_polls)
                .with_poll_interval(config.simulation.poll_interval),
        )
    };
    let (aws, gcp, azure) = (sim(Provider::Aws), sim(Provider::Gcp), sim(Provider::Azure));
    let aws_vm = aws.seed("i-0feed", "us-east-1", "aws.e2e.sim", InstanceState::Running);
    let gcp_vm = gcp.seed("web-eu", "europe-west1-b", "gcp.e2e.sim", InstanceState::Terminated);
    let azure_vm = azure.seed("web-az", "failover-rg", "azure.e2e.sim", InstanceState::Deallocated);

    let providers = Arc::new(
        MultiProvider::new(config.pool.max_concurrent_calls)
            .with_adapter(aws.clone())
            .with_adapter(gcp.clone())
            .with_adapter(azure.clone()),
    );
    let router = DynamicRouter::new(
        providers.clone(),
        Arc::new(RoutingTable::new(config.routing.access_prefix.clone())),
        config.routing.scheme.clone(),
    );
    let repository = JsonFileClusterRepository::open(dir.path()).await.unwrap();
    let registry = new_registry();
    let engine = FailoverEngine::builder(providers, Arc::new(repository), router)
        .tuning(config.failover.clone())
        .metrics(FailoverMetrics::new(registry.clone()).unwrap())
        .build();
    let server = spawn_http_server(registry.clone(), "127.0.0.1:0".parse().unwrap()).unwrap();
    assert_eq!(engine.startup().await.unwrap(), 0);

    let cluster = engine
        .create_cluster(
            ClusterSpec::new("storefront", 443, "/shop")
                .fully_managed()
                .with_member(aws_vm.clone(), Some(1))
                .with_member(gcp_vm.clone(), Some(2))
                .with_member(azure_vm.clone(), Some(2)),
        )
        .await
        .unwrap();
    engine.await_transition(cluster.id).await.unwrap();
    // Hot backup keeps the second choice warm; the tied third stays down.
    assert_eq!(gcp.peek(&gcp_vm), Some(InstanceState::Running));
    assert_eq!(azure.peek(&azure_vm), Some(InstanceState::Deallocated));
    let proxied = format!("/access/{}/cart", cluster.id);
    assert_eq!(
        engine.router().table().resolve(&proxied).unwrap().as_str(),
        "http://aws.e2e.sim:443/shop/cart"
    );

    // The access instance disappears behind the engine's back.
    aws.vanish(&aws_vm);
    let pruned = engine.get_cluster(cluster.id).await.unwrap();
    assert_eq!(pruned.member_count(), 2);
    assert_eq!(pruned.access_instance(), Some(&gcp_vm));
    assert_eq!(pruned.backup_instance(), Some(&azure_vm));
    assert_eq!(
        engine.router().table().resolve(&proxied).unwrap().as_str(),
        "http://gcp.e2e.sim:443/shop/cart"
    );

    // Latency on the new access instance demotes it in favour of azure.
    let outcomes: Vec<SampleOutcome> = [10, 50, 250, 1250, 6250, 31250]
        .into_iter()
        .map(|ms| engine.observe_response(&proxied, Duration::from_millis(ms)))
        .collect();
    assert_eq!(outcomes.last(), Some(&SampleOutcome::Flagged { demotion: true }));
    engine.await_transition(cluster.id).await.unwrap();

    let settled = engine.get_cluster(cluster.id).await.unwrap();
    assert_eq!(settled.access_instance(), Some(&azure_vm));
    assert_eq!(settled.backup_instance(), Some(&gcp_vm));
    assert_eq!(settled.state, ClusterState::Operational);
    assert_eq!(azure.peek(&azure_vm), Some(InstanceState::Running));
    assert_eq!(
        engine.current_access(cluster.id).await.unwrap().unwrap().host,
        "azure.e2e.sim"
    );

    let exported = encode_text(&registry).unwrap();
    assert!(exported.contains("cf_failover_reconciliation_removals_total 1"));
    assert!(exported.contains("cf_failover_auto_demotions_total 1"));
    assert!(exported.contains(r#"cf_failover_transitions_total{outcome="completed"} 2"#));
    assert!(exported.contains("cf_failover_published_routes 1"));

    engine.shutdown();
    server.shutdown().await.unwrap();
}
