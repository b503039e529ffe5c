//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "integration-tests"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Multi-provider facade dispatch and fan-out tests."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use cf_providers::{
    CreateInstanceRequest, InstanceHandle, InstanceState, MultiProvider, Provider, ProviderError,
    SimulatedAdapter, SimulatedCall,
};

fn facade() -> (MultiProvider, Arc<SimulatedAdapter>, Arc<SimulatedAdapter>) {
    let aws = Arc::new(SimulatedAdapter::new(Provider::Aws).with_settle_polls(0));
    let gcp = Arc::new(SimulatedAdapter::new(Provider::Gcp).with_settle_polls(0));
    let facade = MultiProvider::new(4)
        .with_adapter(aws.clone())
        .with_adapter(gcp.clone());
    (facade, aws, gcp)
}

#[tokio::test]
async fn unconfigured_provider_is_not_initialized() {
    let (facade, _, _) = facade();
    let handle = InstanceHandle::new("vm-1", "rg", Provider::Azure);
    let err = facade.start(&handle).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotInitialized(Provider::Azure)));
    let err = facade
        .wait_for_state(&handle, InstanceState::Running, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotInitialized(Provider::Azure)));
    assert_eq!(facade.providers(), vec![Provider::Aws, Provider::Gcp]);
}

#[tokio::test]
async fn calls_dispatch_on_provider_tag() {
    let (facade, aws, gcp) = facade();
    let web = aws.seed("i-web", "us-east-1", "web.sim", InstanceState::Stopped);
    let db = gcp.seed("db", "us-central1-a", "db.sim", InstanceState::Running);

    facade.start(&web).await.unwrap();
    facade.stop(&db).await.unwrap();

    assert_eq!(aws.journal(), vec![SimulatedCall::Start(web.clone())]);
    assert_eq!(gcp.journal(), vec![SimulatedCall::Stop(db.clone())]);
    assert_eq!(facade.get(&web).await.unwrap().state, InstanceState::Running);
    assert_eq!(facade.get(&db).await.unwrap().state, InstanceState::Terminated);
}

#[tokio::test]
async fn list_concatenates_every_provider() {
    let (facade, aws, gcp) = facade();
    aws.seed("i-1", "us-east-1", "a.sim", InstanceState::Running);
    aws.seed("i-2", "eu-west-1", "b.sim", InstanceState::Stopped);
    gcp.seed("web", "us-central1-a", "c.sim", InstanceState::Running);

    let listed = facade.list().await.unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(
        listed.iter().filter(|i| i.provider == Provider::Aws).count(),
        2
    );
}

#[tokio::test]
async fn get_many_keys_each_outcome_by_handle() {
    let (facade, aws, gcp) = facade();
    let present = aws.seed("i-1", "us-east-1", "a.sim", InstanceState::Running);
    let vanished = gcp.seed("web", "us-central1-a", "c.sim", InstanceState::Running);
    gcp.vanish(&vanished);
    let foreign = InstanceHandle::new("vm", "rg", Provider::Azure);

    let results = facade
        .get_many(&[present.clone(), vanished.clone(), foreign.clone()])
        .await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[&present].as_ref().unwrap().host, "a.sim");
    assert!(results[&vanished].as_ref().unwrap_err().is_not_found());
    assert!(matches!(
        results[&foreign],
        Err(ProviderError::NotInitialized(Provider::Azure))
    ));
}

#[tokio::test]
async fn create_routes_by_request_provider() {
    let (facade, _, gcp) = facade();
    let handle = facade
        .create(&CreateInstanceRequest {
            provider: Provider::Gcp,
            name: "fresh".into(),
            instance_type: "e2-small".into(),
            image: "debian-12".into(),
            region: "us-central1-a".into(),
        })
        .await
        .unwrap();
    assert_eq!(handle.provider(), Provider::Gcp);
    assert_eq!(handle.instance_id(), "fresh");
    assert_eq!(gcp.peek(&handle), Some(InstanceState::Running));
}
