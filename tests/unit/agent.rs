//! Unit tests for whole reconciliation passes

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use kafka_operator::state::{FileRelationStore, RelationDataStore, RelationDocument};
use kafka_operator::testing::{
    FakeClusterApi, FakeToolRunner, MemoryRelationStore, MemoryWorkload, broker_pod, cluster_node,
};
use kafka_operator::{
    AgentConfig, AgentEnvironment, Context, HealthState, PassOutcome, Status, UnitIdentity,
    reconcile, run_agent,
};

use crate::common::*;

fn environment(unit_id: u32) -> AgentEnvironment {
    AgentEnvironment {
        identity: UnitIdentity::new(APP, unit_id),
        namespace: "kafka".to_string(),
        bind_address: Some(format!("10.1.0.{}", unit_id + 10)),
        host: None,
        fqdn: format!("kafka-{}.kafka-endpoints.kafka.svc.cluster.local", unit_id),
    }
}

fn unit_context(
    store: Arc<dyn RelationDataStore>,
    config: AgentConfig,
    unit_id: u32,
    leader: bool,
) -> Context {
    Context::new(
        config,
        environment(unit_id),
        store,
        Arc::new(MemoryWorkload::default()),
        Arc::new(FakeToolRunner::default()),
    )
    .with_leadership(Arc::new(AtomicBool::new(leader)))
}

#[tokio::test]
async fn test_follower_completes_after_leader_pass() {
    let fixture = ClusterFixture::new(0)
        .with_peer(1, &[])
        .with_zookeeper(false);
    let store = Arc::new(MemoryRelationStore::new(fixture.relations()));

    let follower = Arc::new(unit_context(store.clone(), fixture.config(), 1, false));
    let leader = Arc::new(unit_context(store.clone(), fixture.config(), 0, true));

    let outcome = reconcile(follower.clone()).await.unwrap();
    assert_eq!(outcome.status(), Status::NoBrokerCreds);

    assert!(reconcile(leader).await.unwrap().is_completed());
    assert!(store.field(PEER_ID, APP, "sync-password").is_some());

    let outcome = reconcile(follower).await.unwrap();
    assert!(outcome.is_completed());
    assert!(outcome.restart_required());
}

#[tokio::test]
async fn test_external_bootstrap_reaches_clients() {
    let fixture = ClusterFixture::new(0)
        .exposed()
        .with_credentials()
        .with_zookeeper(false)
        .with_client(9, "producer", &[("extra-user-roles", "producer"), ("topic", "events")]);
    let store = Arc::new(MemoryRelationStore::new(fixture.relations()));
    let api = Arc::new(
        FakeClusterApi::default()
            .with_pod(broker_pod("kafka-0", APP, "node-a"))
            .with_node(cluster_node("node-a", &[("InternalIP", "10.0.0.4")])),
    );
    let ctx = unit_context(store.clone(), fixture.config(), 0, true).with_cluster_api(api);

    let outcome = reconcile(Arc::new(ctx)).await.unwrap();
    assert!(outcome.is_completed());

    assert_eq!(
        store.field(9, APP, "endpoints").as_deref(),
        Some("10.0.0.4:31000")
    );
    assert_eq!(store.field(9, APP, "topic").as_deref(), Some("events"));
    assert_eq!(store.field(9, APP, "tls").as_deref(), Some("disabled"));
    assert_eq!(store.field(9, APP, "tls-ca").as_deref(), Some("disabled"));
}

#[tokio::test]
async fn test_unscheduled_pod_defers_exposure() {
    let fixture = ClusterFixture::new(0)
        .exposed()
        .with_credentials()
        .with_zookeeper(false);
    let store = Arc::new(MemoryRelationStore::new(fixture.relations()));
    let mut pod = broker_pod("kafka-0", APP, "node-a");
    if let Some(spec) = pod.spec.as_mut() {
        spec.node_name = None;
    }
    let api = Arc::new(FakeClusterApi::default().with_pod(pod));
    let ctx = unit_context(store, fixture.config(), 0, false).with_cluster_api(api.clone());

    let outcome = reconcile(Arc::new(ctx)).await.unwrap();
    assert!(matches!(
        outcome,
        PassOutcome::Deferred {
            status: Status::Active,
            ..
        }
    ));
    // Listener services go up before the properties need the node address
    assert_eq!(api.service_count(), 2);
}

#[tokio::test]
async fn test_pass_against_relation_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relations.json");
    let fixture = ClusterFixture::new(0).with_credentials().with_zookeeper(false);
    let document = RelationDocument {
        relations: fixture.relations(),
    };
    std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

    let store = Arc::new(FileRelationStore::new(&path));
    let ctx = unit_context(store.clone(), fixture.config(), 0, false);
    assert!(reconcile(Arc::new(ctx)).await.unwrap().is_completed());

    // Unit data was written back to the document
    let peer = store.relations("cluster").await.unwrap().remove(0);
    assert!(peer.field("kafka/0", "keystore-password").is_some());
    assert!(peer.field("kafka/0", "restart-requested").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_agent_loop_runs_on_interval_until_shutdown() {
    let fixture = ClusterFixture::new(0).with_credentials().with_zookeeper(false);
    let store = Arc::new(MemoryRelationStore::new(fixture.relations()));
    let health = Arc::new(HealthState::new());
    let config = AgentConfig {
        reconcile_interval_secs: 30,
        ..fixture.config()
    };
    let ctx = unit_context(store, config, 0, false).with_health_state(health.clone());

    run_agent(Arc::new(ctx), tokio::time::sleep(Duration::from_secs(65))).await;

    let metrics = health.metrics.encode();
    assert!(metrics.contains("kafka_operator_passes_total{unit=\"kafka/0\"} 3"));
    assert!(health.is_ready().await);
}
