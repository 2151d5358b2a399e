//! Instance registry
//!
//! At most one state machine instance runs per source collection. The
//! registry owns those instances, refuses work while this node is not the
//! metadata authority, and rebuilds itself from the store on recovery.

use crate::common::{Error, FailureCode, OperationFailure, Result, METRICS};
use crate::reshard::catalog::CatalogClient;
use crate::reshard::completion::{self, Completion, CompletionReceiver};
use crate::reshard::machine::{MachineSettings, StateMachine};
use crate::reshard::participant::ParticipantClient;
use crate::reshard::record::OperationRecord;
use crate::reshard::store::OperationStore;
use crate::reshard::types::{CollectionIdentity, KeyPattern};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Caller's view of a running (or just finished) instance
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    pub operation_id: Uuid,
    pub source: CollectionIdentity,
    /// True when the request joined an operation that was already running
    pub attached: bool,
    completion: CompletionReceiver,
}

impl InstanceHandle {
    /// Wait until the operation reaches `Done` or `Error`
    pub async fn await_completion(&self) -> Completion {
        self.completion.wait().await
    }

    pub fn peek(&self) -> Option<Completion> {
        self.completion.peek()
    }
}

struct Instance {
    operation_id: Uuid,
    key_pattern: KeyPattern,
    generation: u64,
    completion: CompletionReceiver,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct RegistryState {
    serving: bool,
    next_generation: u64,
    instances: HashMap<CollectionIdentity, Instance>,
}

struct Inner {
    store: Arc<dyn OperationStore>,
    catalog: Arc<dyn CatalogClient>,
    machine: Arc<StateMachine>,
    state: Mutex<RegistryState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the map entry, unless a newer instance took the slot
    fn remove(&self, key: &CollectionIdentity, generation: u64) {
        let mut state = self.lock();
        if state
            .instances
            .get(key)
            .map_or(false, |i| i.generation == generation)
        {
            state.instances.remove(key);
            METRICS.active_instances.dec();
        }
    }
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Create an empty registry. It serves nothing until [`Registry::recover`] runs.
    pub fn new(
        store: Arc<dyn OperationStore>,
        catalog: Arc<dyn CatalogClient>,
        participants: Arc<dyn ParticipantClient>,
        settings: MachineSettings,
    ) -> Self {
        let machine = Arc::new(StateMachine::new(
            store.clone(),
            catalog.clone(),
            participants,
            settings,
        ));
        Self {
            inner: Arc::new(Inner {
                store,
                catalog,
                machine,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.inner.store
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogClient> {
        &self.inner.catalog
    }

    pub fn is_serving(&self) -> bool {
        self.inner.lock().serving
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().instances.len()
    }

    /// Handle to the instance of `key`, or a new instance driving `record`.
    ///
    /// A new record is persisted before its instance becomes visible. When an
    /// instance already exists, `record` is dropped and the caller attaches.
    pub fn get_or_create(
        &self,
        key: &CollectionIdentity,
        record: OperationRecord,
    ) -> Result<InstanceHandle> {
        let mut state = self.inner.lock();
        if !state.serving {
            return Err(Error::NotLeader(
                "this node is not serving as metadata authority".into(),
            ));
        }

        if let Some(instance) = state.instances.get(key) {
            if instance.key_pattern != record.metadata.key_pattern {
                warn!(
                    "Request to reshard {} on {} attached to operation {} resharding on {}",
                    key, record.metadata.key_pattern, instance.operation_id, instance.key_pattern
                );
            } else {
                info!(
                    "Request to reshard {} attached to operation {}",
                    key, instance.operation_id
                );
            }
            METRICS.duplicate_submissions.inc();
            return Ok(InstanceHandle {
                operation_id: instance.operation_id,
                source: key.clone(),
                attached: true,
                completion: instance.completion.clone(),
            });
        }

        if record.source() != key {
            return Err(Error::Internal(format!(
                "operation {} belongs to {}, not {}",
                record.id(),
                record.source(),
                key
            )));
        }

        self.inner.store.insert(&record)?;
        METRICS.operations_started.inc();
        info!(
            "Operation {} created to reshard {} on {}",
            record.id(),
            key,
            record.metadata.key_pattern
        );
        Ok(self.spawn(&mut state, record))
    }

    /// Handle to the running instance of `key`
    pub fn lookup(&self, key: &CollectionIdentity) -> Option<InstanceHandle> {
        self.inner.lock().instances.get(key).map(|i| InstanceHandle {
            operation_id: i.operation_id,
            source: key.clone(),
            attached: true,
            completion: i.completion.clone(),
        })
    }

    fn spawn(&self, state: &mut RegistryState, record: OperationRecord) -> InstanceHandle {
        let key = record.source().clone();
        let operation_id = record.id();
        let key_pattern = record.metadata.key_pattern.clone();
        let (tx, rx) = completion::channel();

        state.next_generation += 1;
        let generation = state.next_generation;

        let inner = self.inner.clone();
        let machine = self.inner.machine.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let outcome = machine.run(record).await;
            match &outcome {
                Ok(result) => {
                    METRICS.operations_succeeded.inc();
                    METRICS.documents_copied.add(result.documents_copied);
                    info!(
                        "Operation {} finished, {} documents copied",
                        operation_id, result.documents_copied
                    );
                }
                Err(failure) => {
                    METRICS.operations_failed.inc();
                    error!("Operation {} finished with {}", operation_id, failure);
                }
            }
            tx.publish(outcome);
            inner.remove(&task_key, generation);
        });

        state.instances.insert(
            key.clone(),
            Instance {
                operation_id,
                key_pattern,
                generation,
                completion: rx.clone(),
                task,
            },
        );
        METRICS.active_instances.inc();

        InstanceHandle {
            operation_id,
            source: key,
            attached: false,
            completion: rx,
        }
    }

    /// Rebuild the instance map from the store and start serving.
    ///
    /// Records that cannot be resumed safely are moved to `Error`. Returns the
    /// number of instances started.
    pub fn recover(&self) -> Result<usize> {
        let records = self.inner.store.scan()?;
        let mut state = self.inner.lock();
        let mut started = 0;

        for record in records.into_iter().filter(|r| !r.is_terminal()) {
            let consistency = record.check_consistency().and_then(|()| {
                match state.instances.get(record.source()) {
                    Some(other) if other.operation_id != record.id() => Err(format!(
                        "collection {} already resumed with operation {}",
                        record.source(),
                        other.operation_id
                    )),
                    _ => Ok(()),
                }
            });

            if let Err(reason) = consistency {
                error!(
                    "Operation {} cannot be resumed from phase {}: {}",
                    record.id(),
                    record.phase,
                    reason
                );
                let mut failed = record;
                failed.fail(OperationFailure::new(
                    FailureCode::RecoveryInconsistency,
                    reason,
                ));
                self.inner.store.replace(&failed)?;
                METRICS.operations_failed.inc();
                continue;
            }

            if state.instances.contains_key(record.source()) {
                continue;
            }

            info!(
                "Resuming operation {} on {} in phase {}",
                record.id(),
                record.source(),
                record.phase
            );
            self.spawn(&mut state, record);
            METRICS.recovered_operations.inc();
            started += 1;
        }

        state.serving = true;
        Ok(started)
    }

    /// Stop serving and destroy every instance.
    ///
    /// In-flight participant calls are cancelled with their tasks; callers
    /// waiting on a completion are released with `Interrupted`. Returns once
    /// every task has stopped, so nothing from this term writes the store
    /// afterwards.
    pub async fn step_down(&self) -> usize {
        let stopped: Vec<(CollectionIdentity, Instance)> = {
            let mut state = self.inner.lock();
            state.serving = false;
            state.instances.drain().collect()
        };

        let count = stopped.len();
        for (key, instance) in stopped {
            instance.task.abort();
            if let Err(e) = instance.task.await {
                if !e.is_cancelled() {
                    error!(
                        "Operation {} on {} stopped abnormally: {}",
                        instance.operation_id, key, e
                    );
                }
            }
            METRICS.active_instances.dec();
            info!(
                "Stopped operation {} on {} after losing authority",
                instance.operation_id, key
            );
        }
        count
    }
}
