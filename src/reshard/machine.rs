//! Coordinator state machine driver
//!
//! Runs the phase handler table against real collaborators: persists every
//! change to the record before executing the actions that follow from it,
//! fans actions out in parallel and feeds their results into the next step.

use crate::common::{
    retry_with_backoff, retry_with_backoff_when, timestamp_now_millis, CoordinatorConfig, Error,
    FailureCode, OperationFailure, RetryPolicy, METRICS,
};
use crate::reshard::catalog::CatalogClient;
use crate::reshard::completion::Completion;
use crate::reshard::participant::ParticipantClient;
use crate::reshard::phase::{self, Action, Feedback, PhaseSettings};
use crate::reshard::placement::resolve_participants;
use crate::reshard::record::{OperationRecord, Phase};
use crate::reshard::store::OperationStore;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub retry: RetryPolicy,
    /// Pause between status polls that did not move the phase
    pub poll_interval: Duration,
    pub phase: PhaseSettings,
}

impl MachineSettings {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            poll_interval: config.poll_interval(),
            phase: PhaseSettings {
                apply_lag_threshold_ms: config.apply_lag_threshold_ms,
            },
        }
    }
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(200),
            phase: PhaseSettings::default(),
        }
    }
}

pub struct StateMachine {
    store: Arc<dyn OperationStore>,
    catalog: Arc<dyn CatalogClient>,
    participants: Arc<dyn ParticipantClient>,
    settings: MachineSettings,
}

impl StateMachine {
    pub fn new(
        store: Arc<dyn OperationStore>,
        catalog: Arc<dyn CatalogClient>,
        participants: Arc<dyn ParticipantClient>,
        settings: MachineSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            participants,
            settings,
        }
    }

    /// Drive `record` to a terminal phase
    pub async fn run(&self, mut record: OperationRecord) -> Completion {
        let mut feedback = Vec::new();

        loop {
            let step = phase::step(record.clone(), feedback, &self.settings.phase);

            if step.record != record {
                let mut next = step.record;
                next.updated_at = timestamp_now_millis();
                match self.persist(&next).await {
                    Ok(()) => {
                        if next.phase != record.phase {
                            self.on_transition(&record, &next);
                        }
                        record = next;
                    }
                    Err(e) => {
                        error!(
                            "Operation {}: failed to persist record in phase {}: {}",
                            next.id(),
                            next.phase,
                            e
                        );
                        // Once routing is committed the operation can only move forward
                        let next = if next.routing_committed {
                            next
                        } else {
                            let mut failed = record.clone();
                            failed.fail(OperationFailure::new(
                                FailureCode::Internal,
                                format!("failed to persist operation record: {}", e),
                            ));
                            failed.updated_at = timestamp_now_millis();
                            failed
                        };
                        self.persist_until_stored(&next).await;
                        if next.phase != record.phase {
                            self.on_transition(&record, &next);
                        }
                        record = next;
                    }
                }
            }

            if let Some(outcome) = record.completion() {
                return outcome;
            }

            if !step.advanced && step.actions.iter().all(Action::is_poll) {
                tokio::time::sleep(self.settings.poll_interval).await;
            }

            feedback = join_all(
                step.actions
                    .into_iter()
                    .map(|action| self.execute(&record, action)),
            )
            .await;
        }
    }

    async fn persist(&self, record: &OperationRecord) -> crate::Result<()> {
        retry_with_backoff_when(
            || async move { self.store.replace(record) },
            &self.settings.retry,
            |e| !matches!(e, Error::NotFound(_)),
        )
        .await
    }

    /// Keep writing `record` until the store takes it. Callers only learn
    /// about an outcome once it is durable.
    async fn persist_until_stored(&self, record: &OperationRecord) {
        loop {
            match self.persist(record).await {
                Ok(()) => return,
                Err(Error::NotFound(_)) => {
                    warn!(
                        "Operation {}: record vanished from the store",
                        record.id()
                    );
                    return;
                }
                Err(e) => {
                    error!(
                        "Operation {}: still unable to persist phase {}: {}",
                        record.id(),
                        record.phase,
                        e
                    );
                    tokio::time::sleep(self.settings.retry.max_backoff()).await;
                }
            }
        }
    }

    fn on_transition(&self, from: &OperationRecord, to: &OperationRecord) {
        let elapsed = to.phase_started_at.saturating_sub(from.phase_started_at);
        METRICS.record_phase(from.phase.as_str(), Duration::from_millis(elapsed));
        METRICS.phase(to.phase.as_str()).entered.inc();

        match to.phase {
            Phase::Error => {
                let reason = to
                    .failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_default();
                error!(
                    "Operation {} on {} failed in phase {}: {}",
                    to.id(),
                    to.namespace(),
                    from.phase,
                    reason
                );
            }
            Phase::Done => info!(
                "Operation {} on {} committed, new collection uuid {}",
                to.id(),
                to.namespace(),
                to.id()
            ),
            phase => info!(
                "Operation {} on {} entered phase {} (sequence {})",
                to.id(),
                to.namespace(),
                phase,
                to.sequence
            ),
        }
    }

    async fn execute(&self, record: &OperationRecord, action: Action) -> Feedback {
        match action {
            Action::ResolveParticipants => match self.resolve(record) {
                Ok(feedback) => feedback,
                Err(e) => Feedback::Failed(OperationFailure::from(&e)),
            },
            Action::Dispatch(instruction) => {
                debug!(
                    "Operation {}: {} to {} {} (sequence {})",
                    record.id(),
                    instruction.command,
                    instruction.role,
                    instruction.shard_id,
                    instruction.sequence
                );
                let shard = instruction.shard_id.clone();
                let outcome = retry_with_backoff(
                    || self.participants.send(&instruction),
                    &self.settings.retry,
                )
                .await;
                participant_feedback(&shard, outcome)
            }
            Action::Poll { shard_id, role } => {
                let id = record.id();
                let outcome = retry_with_backoff(
                    || self.participants.status(&shard_id, role, id),
                    &self.settings.retry,
                )
                .await;
                participant_feedback(&shard_id, outcome)
            }
            Action::CommitRouting => match self.catalog.commit_resharding(record) {
                Ok(()) => Feedback::RoutingCommitted,
                Err(e) => {
                    warn!("Operation {}: routing commit failed: {}", record.id(), e);
                    Feedback::Failed(OperationFailure::from(&e))
                }
            },
        }
    }

    fn resolve(&self, record: &OperationRecord) -> crate::Result<Feedback> {
        let routing = self.catalog.routing_info(record.namespace())?;
        if routing.collection != *record.source() {
            return Err(Error::ConflictingOperation(format!(
                "collection is now {}, operation was started on {}",
                routing.collection,
                record.source()
            )));
        }
        let shards = self.catalog.list_shards()?;
        let placement = resolve_participants(record, &routing.shards, &shards)?;
        info!(
            "Operation {}: donors {:?}, recipients {:?}",
            record.id(),
            placement.donors,
            placement.recipients
        );
        Ok(Feedback::Resolved(placement))
    }
}

fn participant_feedback(
    shard: &str,
    outcome: crate::Result<crate::reshard::participant::ParticipantReport>,
) -> Feedback {
    match outcome {
        Ok(report) => Feedback::Report(report),
        Err(Error::ParticipantFailure { shard, reason }) => {
            Feedback::Failed(OperationFailure::participant(shard, reason))
        }
        Err(e) => {
            warn!("Giving up on shard {}: {}", shard, e);
            Feedback::Failed(OperationFailure::participant(shard, e.to_string()))
        }
    }
}
