//! ---
//! cf_section: "15-testing-qa-runbook"
//! cf_subsection: "integration"
//! cf_type: "source"
//! cf_scope: "test"
//! cf_description: "Failover transitions against simulated clouds."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use cf_cluster::{ClusterSpec, ClusterState, InMemoryClusterRepository};
use cf_common::FailoverConfig;
use cf_failover::{EngineError, FailoverEngine, SampleOutcome};
use cf_providers::{
    InstanceHandle, InstanceState, MultiProvider, Provider, ProviderError, SimulatedAdapter,
    SimulatedCall,
};
use cf_routing::{DynamicRouter, RoutingTable};

struct Clouds {
    aws: Arc<SimulatedAdapter>,
    gcp: Arc<SimulatedAdapter>,
    azure: Arc<SimulatedAdapter>,
    engine: FailoverEngine,
}

fn tuning() -> FailoverConfig {
    FailoverConfig {
        min_request_count: 0,
        response_time_interval: Duration::ZERO,
        transition_cooldown: Duration::ZERO,
        state_timeout: Duration::from_secs(5),
        ..FailoverConfig::default()
    }
}

fn clouds() -> Clouds {
    let sim = |provider| {
        Arc::new(
            SimulatedAdapter::new(provider)
                .with_settle_polls(1)
                .with_poll_interval(Duration::from_millis(5)),
        )
    };
    let (aws, gcp, azure) = (sim(Provider::Aws), sim(Provider::Gcp), sim(Provider::Azure));
    let providers = Arc::new(
        MultiProvider::new(8)
            .with_adapter(aws.clone())
            .with_adapter(gcp.clone())
            .with_adapter(azure.clone()),
    );
    let router = DynamicRouter::new(
        providers.clone(),
        Arc::new(RoutingTable::new("/access")),
        "http",
    );
    let engine = FailoverEngine::builder(
        providers,
        Arc::new(InMemoryClusterRepository::new()),
        router,
    )
    .tuning(tuning())
    .build();
    Clouds {
        aws,
        gcp,
        azure,
        engine,
    }
}

fn started(journal: &[SimulatedCall], handle: &InstanceHandle) -> bool {
    journal.contains(&SimulatedCall::Start(handle.clone()))
}

fn stopped(journal: &[SimulatedCall], handle: &InstanceHandle) -> bool {
    journal.contains(&SimulatedCall::Stop(handle.clone()))
}

fn cold_standby(name: &str) -> ClusterSpec {
    let mut spec = ClusterSpec::new(name, 80, "").fully_managed();
    spec.enable_hot_backup = false;
    spec
}

fn routed_host(engine: &FailoverEngine, cluster: cf_cluster::ClusterId) -> Option<String> {
    engine
        .router()
        .table()
        .get(cluster)
        .and_then(|entry| entry.target.host_str().map(str::to_owned))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn escalating_latency_moves_traffic_off_aws() {
    let Clouds {
        aws,
        gcp,
        azure,
        engine,
    } = clouds();
    let aws_vm = aws.seed("i-0aws", "us-east-1", "aws.vm.sim", InstanceState::Running);
    let gcp_vm = gcp.seed("vm-gcp", "europe-west1-b", "gcp.vm.sim", InstanceState::Running);
    let azure_vm = azure.seed("vm-azure", "westeurope", "azure.vm.sim", InstanceState::Deallocated);

    let spec = ClusterSpec::new("web", 80, "").fully_managed();
    let cluster = engine
        .create_cluster(
            spec.with_member(aws_vm.clone(), None)
                .with_member(gcp_vm.clone(), None)
                .with_member(azure_vm.clone(), None),
        )
        .await
        .unwrap();
    engine.await_transition(cluster.id).await.unwrap();
    assert_eq!(routed_host(&engine, cluster.id).as_deref(), Some("aws.vm.sim"));
    for adapter in [&aws, &gcp, &azure] {
        adapter.clear_journal();
    }

    let outcomes: Vec<SampleOutcome> = [10, 50, 250, 1250, 6250, 31250]
        .into_iter()
        .map(|ms| engine.add_response_time(cluster.id, Duration::from_millis(ms)))
        .collect();
    assert_eq!(outcomes[0], SampleOutcome::Accepted);
    assert_eq!(outcomes[4], SampleOutcome::Flagged { demotion: false });
    assert_eq!(outcomes[5], SampleOutcome::Flagged { demotion: true });
    engine.await_transition(cluster.id).await.unwrap();

    assert!(stopped(&aws.journal(), &aws_vm));
    assert!(started(&gcp.journal(), &gcp_vm));
    assert!(started(&azure.journal(), &azure_vm));
    assert!(!started(&aws.journal(), &aws_vm));
    assert_eq!(aws.peek(&aws_vm), Some(InstanceState::Stopped));
    assert_eq!(azure.peek(&azure_vm), Some(InstanceState::Running));
    assert_eq!(routed_host(&engine, cluster.id).as_deref(), Some("gcp.vm.sim"));

    let current = engine.get_cluster(cluster.id).await.unwrap();
    assert_eq!(current.access_instance(), Some(&gcp_vm));
    assert_eq!(current.backup_instance(), Some(&azure_vm));
    assert_eq!(current.membership(&aws_vm).unwrap().priority, 2);
    assert_eq!(current.state, ClusterState::Operational);
    assert!(engine.response_time_info(cluster.id).await.unwrap().flags.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sequential_adds_start_only_the_selection() {
    let Clouds {
        aws,
        gcp,
        azure,
        engine,
    } = clouds();
    let aws_vm = aws.seed("i-0aws", "us-east-1", "aws.vm.sim", InstanceState::Stopped);
    let gcp_vm = gcp.seed("vm-gcp", "europe-west1-b", "gcp.vm.sim", InstanceState::Terminated);
    let azure_vm = azure.seed("vm-azure", "westeurope", "azure.vm.sim", InstanceState::Deallocated);

    let spec = ClusterSpec::new("api", 8080, "/v1").fully_managed();
    let cluster = engine.create_cluster(spec).await.unwrap();
    assert_eq!(cluster.state, ClusterState::NoInstances);

    for (handle, priority) in [(&azure_vm, 2), (&gcp_vm, 1), (&aws_vm, 3)] {
        engine
            .add_instance_with_priority(cluster.id, handle.clone(), Some(priority))
            .await
            .unwrap();
        engine.await_transition(cluster.id).await.unwrap();
    }

    assert!(started(&gcp.journal(), &gcp_vm));
    assert!(started(&azure.journal(), &azure_vm));
    assert!(!started(&aws.journal(), &aws_vm));
    assert_eq!(aws.peek(&aws_vm), Some(InstanceState::Stopped));
    assert_eq!(routed_host(&engine, cluster.id).as_deref(), Some("gcp.vm.sim"));
    assert_eq!(
        engine
            .router()
            .table()
            .resolve(&format!("/access/{}/health", cluster.id))
            .unwrap()
            .as_str(),
        "http://gcp.vm.sim:8080/v1/health"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_access_runs_before_traffic_moves_and_old_one_stops() {
    let Clouds { aws, engine, .. } = clouds();
    let old = aws.seed("i-old", "us-east-1", "old.vm.sim", InstanceState::Running);
    let new = aws.seed("i-new", "us-east-1", "new.vm.sim", InstanceState::Stopped);

    let cluster = engine
        .create_cluster(
            cold_standby("ordered").with_member(old.clone(), Some(5)),
        )
        .await
        .unwrap();
    engine.await_transition(cluster.id).await.unwrap();
    aws.clear_journal();

    engine
        .add_instance_with_priority(cluster.id, new.clone(), Some(1))
        .await
        .unwrap();
    engine.await_transition(cluster.id).await.unwrap();

    let journal = aws.journal();
    let start_at = journal
        .iter()
        .position(|call| *call == SimulatedCall::Start(new.clone()))
        .unwrap();
    let stop_at = journal
        .iter()
        .position(|call| *call == SimulatedCall::Stop(old.clone()))
        .unwrap();
    assert!(start_at < stop_at);
    // One observation from the wait and one from publishing the route.
    let running_before_stop = journal[start_at..stop_at]
        .iter()
        .filter(|call| **call == SimulatedCall::Get(new.clone(), InstanceState::Running))
        .count();
    assert!(running_before_stop >= 2);
    assert!(journal[stop_at..]
        .iter()
        .any(|call| *call == SimulatedCall::Get(old.clone(), InstanceState::Stopped)));

    assert_eq!(routed_host(&engine, cluster.id).as_deref(), Some("new.vm.sim"));
    let current = engine.get_cluster(cluster.id).await.unwrap();
    assert_eq!(current.state, ClusterState::Operational);
    assert_eq!(current.access_instance(), Some(&new));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cooldown_defers_recomputation() {
    let Clouds { aws, engine, .. } = clouds();
    let first = aws.seed("i-1", "us-east-1", "one.vm.sim", InstanceState::Running);
    let second = aws.seed("i-2", "us-east-1", "two.vm.sim", InstanceState::Stopped);
    engine.set_tuning(FailoverConfig {
        transition_cooldown: Duration::from_secs(3600),
        ..tuning()
    });

    let cluster = engine
        .create_cluster(
            ClusterSpec::new("calm", 80, "")
                .fully_managed()
                .with_member(first.clone(), Some(2)),
        )
        .await
        .unwrap();
    engine.await_transition(cluster.id).await.unwrap();

    let after = engine
        .add_instance_with_priority(cluster.id, second.clone(), Some(1))
        .await
        .unwrap();
    engine.await_transition(cluster.id).await.unwrap();
    assert_eq!(after.access_instance(), Some(&first));
    assert_eq!(aws.peek(&second), Some(InstanceState::Stopped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_requests_demote_through_the_access_path() {
    let Clouds { gcp, engine, .. } = clouds();
    let primary = gcp.seed("vm-a", "us-central1-a", "a.vm.sim", InstanceState::Running);
    let standby = gcp.seed("vm-b", "us-central1-a", "b.vm.sim", InstanceState::Terminated);

    let cluster = engine
        .create_cluster(
            cold_standby("flaky")
                .with_member(primary.clone(), Some(1))
                .with_member(standby.clone(), Some(1)),
        )
        .await
        .unwrap();
    engine.await_transition(cluster.id).await.unwrap();

    let path = format!("/access/{}/login", cluster.id);
    let fired: Vec<bool> = (0..5).map(|_| engine.observe_failure(&path)).collect();
    assert_eq!(fired, vec![false, false, false, false, true]);
    engine.await_transition(cluster.id).await.unwrap();

    // Demoted to 2, behind the standby.
    let current = engine.get_cluster(cluster.id).await.unwrap();
    assert_eq!(current.membership(&primary).unwrap().priority, 2);
    assert_eq!(current.access_instance(), Some(&standby));
    assert_eq!(routed_host(&engine, cluster.id).as_deref(), Some("b.vm.sim"));
    assert!(!engine.observe_failure("/elsewhere/login"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_start_surfaces_and_leaves_cluster_transitioning() {
    let Clouds { gcp, engine, .. } = clouds();
    let old = gcp.seed("web-old", "us-central1-a", "old.vm.sim", InstanceState::Running);
    let new = gcp.seed("web-new", "us-central1-a", "new.vm.sim", InstanceState::Terminated);
    let cluster = engine
        .create_cluster(cold_standby("fragile").with_member(old.clone(), Some(2)))
        .await
        .unwrap();
    engine.await_transition(cluster.id).await.unwrap();
    assert_eq!(routed_host(&engine, cluster.id).as_deref(), Some("old.vm.sim"));

    gcp.fail_calls_for(&new);
    gcp.clear_journal();
    let err = engine
        .add_instance_with_priority(cluster.id, new.clone(), Some(1))
        .await
        .unwrap_err();
    assert!(
        matches!(err, EngineError::Provider(ProviderError::Upstream { .. })),
        "unexpected error: {err}"
    );

    // No rollback: the new selection is kept and traffic stays on the old member.
    let stored = engine.get_cluster(cluster.id).await.unwrap();
    assert_eq!(stored.state, ClusterState::Transitioning);
    assert_eq!(stored.access_instance(), Some(&new));
    assert_eq!(routed_host(&engine, cluster.id).as_deref(), Some("old.vm.sim"));
    assert!(!stopped(&gcp.journal(), &old));
    assert_eq!(gcp.peek(&old), Some(InstanceState::Running));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_that_never_settles_times_out() {
    let gcp = Arc::new(
        SimulatedAdapter::new(Provider::Gcp)
            .with_settle_polls(u32::MAX)
            .with_poll_interval(Duration::from_millis(5)),
    );
    let providers = Arc::new(MultiProvider::new(4).with_adapter(gcp.clone()));
    let router = DynamicRouter::new(
        providers.clone(),
        Arc::new(RoutingTable::new("/access")),
        "http",
    );
    let engine = FailoverEngine::builder(
        providers,
        Arc::new(InMemoryClusterRepository::new()),
        router,
    )
    .tuning(FailoverConfig {
        state_timeout: Duration::from_millis(150),
        ..tuning()
    })
    .build();
    let stuck = gcp.seed("web-stuck", "europe-west1-b", "stuck.vm.sim", InstanceState::Terminated);

    let cluster = engine
        .create_cluster(cold_standby("stuck").with_member(stuck.clone(), None))
        .await
        .unwrap();
    assert_eq!(cluster.state, ClusterState::Transitioning);

    let err = engine.await_transition(cluster.id).await.unwrap_err();
    assert!(
        matches!(err, EngineError::Transition { cluster: id, .. } if id == cluster.id),
        "unexpected error: {err}"
    );
    let stored = engine.get_cluster(cluster.id).await.unwrap();
    assert_eq!(stored.state, ClusterState::Transitioning);
    assert_eq!(gcp.peek(&stuck), Some(InstanceState::Staging));
    assert!(engine.router().table().get(cluster.id).is_none());
}
