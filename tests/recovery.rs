//! Failover: a new authority resumes operations from their persisted phase

mod common;

use common::{request, settings, within, Cluster, GatedParticipants, RecordingStore};
use minireshard::common::{FailureCode, NodeState};
use minireshard::coordinator::authority::{start_authority_tasks, Authority};
use minireshard::coordinator::MetadataStore;
use minireshard::reshard::builder::build_operation;
use minireshard::reshard::catalog::CatalogClient;
use minireshard::reshard::record::{Phase, ReshardingResult};
use minireshard::reshard::request::{validate, ValidationContext};
use minireshard::reshard::store::OperationStore;
use minireshard::reshard::ReshardService;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const SHARDS: [(&str, NodeState); 3] = [
    ("shard-1", NodeState::Alive),
    ("shard-2", NodeState::Alive),
    ("shard-3", NodeState::Alive),
];
const OWNERS: [&str; 2] = ["shard-1", "shard-2"];

async fn uninterrupted() -> ReshardingResult {
    let cluster = Cluster::new(&SHARDS, &OWNERS);
    within(cluster.leader().reshard_collection(&request(json!({"sku": 1})), true))
        .await
        .unwrap()
}

/// Run until the first `command` instruction goes out, kill the node, then
/// let a fresh node finish the job.
async fn fail_over_at(cluster: &Cluster, command: &'static str, expected: Phase) -> ReshardingResult {
    let gated = Arc::new(GatedParticipants::new(cluster.participants.clone(), command));
    let old = cluster.registry_with(gated.clone(), settings());
    old.recover().unwrap();
    let service = ReshardService::new(old.clone(), false);

    let handle = service.submit(&request(json!({"sku": 1})), true).unwrap();
    within(gated.reached.notified()).await;

    assert_eq!(old.step_down().await, 1);
    let failure = within(handle.await_completion()).await.unwrap_err();
    assert_eq!(failure.code, FailureCode::Interrupted);

    let persisted = cluster.only_record();
    assert_eq!(persisted.phase, expected, "gated on {command}");
    assert!(!persisted.is_terminal());

    let new = cluster.registry_with(Arc::new(cluster.participants.clone()), settings());
    assert_eq!(new.recover().unwrap(), 1);
    let resumed = new.lookup(&cluster.source).unwrap();
    assert_eq!(resumed.operation_id, handle.operation_id);

    within(resumed.await_completion()).await.unwrap()
}

#[tokio::test]
async fn test_resume_from_every_phase() {
    let baseline = uninterrupted().await;

    for (command, phase) in [
        ("prepare", Phase::PreparingToDonate),
        ("clone", Phase::Cloning),
        ("apply", Phase::Applying),
        ("block-writes", Phase::BlockingWrites),
        ("drain", Phase::BlockingWrites),
        ("commit", Phase::Committing),
    ] {
        let cluster = Cluster::new(&SHARDS, &OWNERS);
        let result = fail_over_at(&cluster, command, phase).await;

        assert_eq!(result.donors, baseline.donors, "resumed from {phase}");
        assert_eq!(result.recipients, baseline.recipients, "resumed from {phase}");
        assert_eq!(result.documents_copied, baseline.documents_copied, "resumed from {phase}");
        assert_eq!(result.key_pattern, baseline.key_pattern);
        assert_eq!(cluster.current_uuid(), result.new_collection_uuid);
        assert_eq!(cluster.only_record().phase, Phase::Done);
    }
}

#[tokio::test]
async fn test_resume_from_initializing() {
    let cluster = Cluster::new(&SHARDS, &OWNERS);

    // A record persisted just before the previous authority died
    let ctx = ValidationContext {
        is_metadata_authority: true,
        known_shards: SHARDS.iter().map(|(id, _)| id.to_string()).collect(),
        ..ValidationContext::default()
    };
    let validated = validate(&request(json!({"sku": 1})), &ctx).unwrap();
    let routing = cluster.catalog.routing_info(&validated.namespace).unwrap();
    let record = build_operation(&validated, &routing).unwrap();
    cluster.store.insert(&record).unwrap();

    let registry = cluster.registry_with(Arc::new(cluster.participants.clone()), settings());
    assert_eq!(registry.recover().unwrap(), 1);
    let result = within(registry.lookup(&cluster.source).unwrap().await_completion())
        .await
        .unwrap();

    let baseline = uninterrupted().await;
    assert_eq!(result.operation_id, record.id());
    assert_eq!(result.donors, baseline.donors);
    assert_eq!(result.recipients, baseline.recipients);
    assert_eq!(result.documents_copied, baseline.documents_copied);
}

#[tokio::test]
async fn test_duplicate_during_resumption_attaches() {
    let cluster = Cluster::new(&SHARDS, &OWNERS);
    let gated = Arc::new(GatedParticipants::new(cluster.participants.clone(), "apply"));
    let old = cluster.registry_with(gated.clone(), settings());
    old.recover().unwrap();
    let first = ReshardService::new(old.clone(), false)
        .submit(&request(json!({"sku": 1})), true)
        .unwrap();
    within(gated.reached.notified()).await;
    old.step_down().await;

    let service = cluster.leader();
    let again = service.submit(&request(json!({"sku": 1})), true).unwrap();
    assert!(again.attached);
    assert_eq!(again.operation_id, first.operation_id);
    within(again.await_completion()).await.unwrap();
    assert_eq!(cluster.store.scan().unwrap().len(), 1);
}

#[tokio::test]
async fn test_authority_handover_with_durable_store() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = Arc::new(MetadataStore::open(dir.path().join("meta.db")).unwrap());
    let cluster = Cluster::with_store(&SHARDS, &OWNERS, metadata.clone());

    // Node A holds the authority and stalls while cloning
    let gated = Arc::new(GatedParticipants::new(cluster.participants.clone(), "clone"));
    let registry_a = cluster.registry_with(gated.clone(), settings());
    let authority_a = Authority::new("coord-a");
    let _watch_a = start_authority_tasks(&authority_a, registry_a.clone());
    authority_a.become_leader();
    for _ in 0..200 {
        if registry_a.is_serving() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let handle = ReshardService::new(registry_a.clone(), false)
        .submit(&request(json!({"sku": 1})), authority_a.is_leader())
        .unwrap();
    within(gated.reached.notified()).await;

    // Node B takes over
    authority_a.step_down();
    let registry_b = cluster.registry_with(Arc::new(cluster.participants.clone()), settings());
    let authority_b = Authority::new("coord-b");
    let _watch_b = start_authority_tasks(&authority_b, registry_b.clone());
    authority_b.become_leader();

    let failure = within(handle.await_completion()).await.unwrap_err();
    assert_eq!(failure.code, FailureCode::Interrupted);

    let resumed = within(async {
        loop {
            if let Some(h) = registry_b.lookup(&cluster.source) {
                return h;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    let result = within(resumed.await_completion()).await.unwrap();

    assert_eq!(result.operation_id, handle.operation_id);
    let stored = metadata.get(&handle.operation_id).unwrap().unwrap();
    assert_eq!(stored.phase, Phase::Done);
    assert_eq!(stored.result, Some(result));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_step_down_waits_for_running_instance() {
    let store = Arc::new(RecordingStore::new());
    let cluster = Cluster::with_store(&SHARDS, &OWNERS, store.clone());
    let registry = cluster.registry_with(Arc::new(cluster.participants.clone()), settings());
    registry.recover().unwrap();

    store.slow_replaces(200);
    let handle = ReshardService::new(registry.clone(), false)
        .submit(&request(json!({"sku": 1})), true)
        .unwrap();

    // Catch the instance in the middle of a phase write
    within(async {
        while !store.replacing.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;

    assert_eq!(registry.step_down().await, 1);
    let writes = store.write_count();
    assert!(!store.replacing.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.write_count(), writes, "instance wrote after step-down");

    let failure = within(handle.await_completion()).await.unwrap_err();
    assert_eq!(failure.code, FailureCode::Interrupted);
}
