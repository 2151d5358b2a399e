//! Shared fixtures: an in-process cluster of shard agents behind a registry
#![allow(dead_code)]

use async_trait::async_trait;
use minireshard::common::{Error, NodeState, Result, RetryPolicy};
use minireshard::reshard::catalog::{CollectionEntry, InMemoryCatalog, ShardInfo};
use minireshard::reshard::machine::MachineSettings;
use minireshard::reshard::participant::{Instruction, ParticipantClient, ParticipantReport};
use minireshard::reshard::record::{OperationRecord, ParticipantRole, Phase};
use minireshard::reshard::registry::Registry;
use minireshard::reshard::store::{InMemoryOperationStore, OperationStore};
use minireshard::reshard::types::{CollectionIdentity, Namespace};
use minireshard::reshard::ReshardService;
use minireshard::shard::agent::{Pacing, ShardAgent};
use minireshard::shard::LocalParticipants;
use minireshard::ReshardCollectionRequest;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub const NAMESPACE: &str = "shop.orders";

pub fn pacing() -> Pacing {
    Pacing {
        clone_batches: 2,
        docs_per_batch: 100,
        initial_lag_ms: 1_000,
        lag_step_ms: 400,
    }
}

pub fn settings() -> MachineSettings {
    MachineSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            call_timeout_ms: 60_000,
        },
        poll_interval: Duration::from_millis(2),
        ..MachineSettings::default()
    }
}

pub fn request(key: Value) -> ReshardCollectionRequest {
    let key = serde_json::from_value(key).unwrap();
    ReshardCollectionRequest::new(Namespace::parse(NAMESPACE).unwrap(), key)
}

/// Catalog, store and shard agents that outlive any one registry
pub struct Cluster {
    pub catalog: Arc<InMemoryCatalog>,
    pub store: Arc<dyn OperationStore>,
    pub participants: LocalParticipants,
    pub source: CollectionIdentity,
}

impl Cluster {
    /// `shards` as (id, state); the collection is owned by `owners`
    pub fn new(shards: &[(&str, NodeState)], owners: &[&str]) -> Self {
        Self::with_store(shards, owners, Arc::new(InMemoryOperationStore::new()))
    }

    pub fn with_store(
        shards: &[(&str, NodeState)],
        owners: &[&str],
        store: Arc<dyn OperationStore>,
    ) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        for (id, state) in shards {
            let mut shard = ShardInfo::new(*id, format!("local://{}", id));
            shard.state = *state;
            catalog.put_shard(shard);
        }

        let entry = CollectionEntry::new(
            Namespace::parse(NAMESPACE).unwrap(),
            serde_json::from_value(json!({"_id": 1})).unwrap(),
            owners.iter().map(|s| s.to_string()).collect(),
        );
        let source = entry.identity();
        catalog.put_collection(entry);

        let participants =
            LocalParticipants::with_shards(shards.iter().map(|(id, _)| *id), pacing());

        Self {
            catalog,
            store,
            participants,
            source,
        }
    }

    pub fn agent(&self, shard_id: &str) -> &Arc<ShardAgent> {
        self.participants.agent(shard_id).unwrap()
    }

    /// A coordinator node talking to the shards through `client`
    pub fn registry_with(&self, client: Arc<dyn ParticipantClient>, settings: MachineSettings) -> Registry {
        Registry::new(self.store.clone(), self.catalog.clone(), client, settings)
    }

    /// A serving coordinator node with direct access to the shards
    pub fn leader(&self) -> ReshardService {
        let registry = self.registry_with(Arc::new(self.participants.clone()), settings());
        registry.recover().unwrap();
        ReshardService::new(registry, false)
    }

    pub fn current_uuid(&self) -> Uuid {
        self.catalog
            .collection(&self.source.namespace)
            .unwrap()
            .uuid
    }

    pub fn only_record(&self) -> OperationRecord {
        let records = self.store.scan().unwrap();
        assert_eq!(records.len(), 1, "expected exactly one operation record");
        records.into_iter().next().unwrap()
    }
}

/// Passes calls through, except instructions whose command is gated: those
/// signal `reached` and then hang, like a coordinator that died mid-call.
pub struct GatedParticipants {
    inner: LocalParticipants,
    gated: Mutex<HashSet<&'static str>>,
    pub reached: Notify,
}

impl GatedParticipants {
    pub fn new(inner: LocalParticipants, command: &'static str) -> Self {
        Self {
            inner,
            gated: Mutex::new(HashSet::from([command])),
            reached: Notify::new(),
        }
    }
}

#[async_trait]
impl ParticipantClient for GatedParticipants {
    async fn send(&self, instruction: &Instruction) -> Result<ParticipantReport> {
        if self.gated.lock().unwrap().contains(instruction.command.name()) {
            self.reached.notify_one();
            return std::future::pending().await;
        }
        self.inner.send(instruction).await
    }

    async fn status(
        &self,
        shard_id: &str,
        role: ParticipantRole,
        operation_id: Uuid,
    ) -> Result<ParticipantReport> {
        self.inner.status(shard_id, role, operation_id).await
    }
}

/// Passes calls through; right after `shard` accepts `command` for the first
/// time, that shard restarts and loses its state.
pub struct RestartingParticipants {
    inner: LocalParticipants,
    shard: &'static str,
    command: &'static str,
    restarted: AtomicBool,
}

impl RestartingParticipants {
    pub fn new(inner: LocalParticipants, shard: &'static str, command: &'static str) -> Self {
        Self {
            inner,
            shard,
            command,
            restarted: AtomicBool::new(false),
        }
    }

    pub fn restarted(&self) -> bool {
        self.restarted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ParticipantClient for RestartingParticipants {
    async fn send(&self, instruction: &Instruction) -> Result<ParticipantReport> {
        let report = self.inner.send(instruction).await?;
        if instruction.shard_id == self.shard
            && instruction.command.name() == self.command
            && !self.restarted.swap(true, Ordering::SeqCst)
        {
            self.inner.agent(self.shard).unwrap().restart();
        }
        Ok(report)
    }

    async fn status(
        &self,
        shard_id: &str,
        role: ParticipantRole,
        operation_id: Uuid,
    ) -> Result<ParticipantReport> {
        self.inner.status(shard_id, role, operation_id).await
    }
}

/// Wraps a store and remembers the (phase, sequence) of every replace.
/// Replaces can be slowed down to hold the writer inside the store.
pub struct RecordingStore {
    inner: InMemoryOperationStore,
    pub writes: Mutex<Vec<(Phase, u64)>>,
    replace_delay_ms: AtomicU64,
    pub replacing: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryOperationStore::new(),
            writes: Mutex::new(Vec::new()),
            replace_delay_ms: AtomicU64::new(0),
            replacing: AtomicBool::new(false),
        }
    }

    pub fn slow_replaces(&self, delay_ms: u64) {
        self.replace_delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

impl OperationStore for RecordingStore {
    fn get(&self, operation_id: &Uuid) -> Result<Option<OperationRecord>> {
        self.inner.get(operation_id)
    }

    fn insert(&self, record: &OperationRecord) -> Result<()> {
        self.inner.insert(record)
    }

    fn replace(&self, record: &OperationRecord) -> Result<()> {
        self.replacing.store(true, Ordering::SeqCst);
        let delay = self.replace_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            // A blocking write, like a store stalled on disk
            std::thread::sleep(Duration::from_millis(delay));
        }
        self.writes
            .lock()
            .unwrap()
            .push((record.phase, record.sequence));
        let outcome = self.inner.replace(record);
        self.replacing.store(false, Ordering::SeqCst);
        outcome
    }

    fn scan(&self) -> Result<Vec<OperationRecord>> {
        self.inner.scan()
    }

    fn delete(&self, operation_id: &Uuid) -> Result<()> {
        self.inner.delete(operation_id)
    }
}

/// A store whose next `n` replaces fail
pub struct FlakyStore {
    inner: InMemoryOperationStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryOperationStore::new(),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_replaces(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

impl OperationStore for FlakyStore {
    fn get(&self, operation_id: &Uuid) -> Result<Option<OperationRecord>> {
        self.inner.get(operation_id)
    }

    fn insert(&self, record: &OperationRecord) -> Result<()> {
        self.inner.insert(record)
    }

    fn replace(&self, record: &OperationRecord) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Internal("disk hiccup".into()));
        }
        self.inner.replace(record)
    }

    fn scan(&self) -> Result<Vec<OperationRecord>> {
        self.inner.scan()
    }

    fn delete(&self, operation_id: &Uuid) -> Result<()> {
        self.inner.delete(operation_id)
    }
}

pub async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}
