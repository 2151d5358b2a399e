//! Shard-side participant
//!
//! Keeps one fenced state per (operation, role). Data movement is simulated:
//! a recipient copies one snapshot batch per status poll and its replication
//! lag shrinks by a fixed step per poll. While applying, changes keep
//! arriving from the donors, so lag bottoms out above zero; it reaches zero
//! only when draining after the donors blocked writes.

use crate::common::{Error, Result, ShardConfig};
use crate::reshard::participant::{Command, Instruction, ParticipantReport};
use crate::reshard::record::{ParticipantRole, ParticipantStatus};
use crate::reshard::types::{Namespace, ShardId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lag a recipient reports while donors still accept writes
const APPLYING_LAG_FLOOR_MS: u64 = 1;

/// Simulated copier pacing
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub clone_batches: u32,
    pub docs_per_batch: u64,
    pub initial_lag_ms: u64,
    pub lag_step_ms: u64,
}

impl From<&ShardConfig> for Pacing {
    fn from(config: &ShardConfig) -> Self {
        Self {
            clone_batches: config.clone_batches,
            docs_per_batch: config.docs_per_batch,
            initial_lag_ms: config.initial_lag_ms,
            lag_step_ms: config.lag_step_ms,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from(&ShardConfig::default())
    }
}

#[derive(Debug)]
struct ParticipantState {
    namespace: Namespace,
    temp_namespace: Namespace,
    sequence: u64,
    status: ParticipantStatus,
    batches_done: u32,
    documents_copied: u64,
    lag_ms: Option<u64>,
    writes_blocked: bool,
    error: Option<String>,
}

impl ParticipantState {
    fn new(instruction: &Instruction) -> Self {
        Self {
            namespace: instruction.namespace.clone(),
            temp_namespace: instruction.temp_namespace.clone(),
            sequence: 0,
            status: ParticipantStatus::Pending,
            batches_done: 0,
            documents_copied: 0,
            lag_ms: None,
            writes_blocked: false,
            error: None,
        }
    }
}

type StateKey = (Uuid, ParticipantRole);

pub struct ShardAgent {
    shard_id: ShardId,
    pacing: Pacing,
    operations: Mutex<HashMap<StateKey, ParticipantState>>,
    injected_failures: Mutex<HashMap<String, String>>,
    unreachable: AtomicBool,
    side_effects: AtomicU64,
}

impl ShardAgent {
    pub fn new(shard_id: impl Into<ShardId>, pacing: Pacing) -> Self {
        Self {
            shard_id: shard_id.into(),
            pacing,
            operations: Mutex::new(HashMap::new()),
            injected_failures: Mutex::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
            side_effects: AtomicU64::new(0),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    fn operations(&self) -> MutexGuard<'_, HashMap<StateKey, ParticipantState>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Report `reason` as this shard's failure the next time `command` is accepted
    pub fn fail_on(&self, command: &str, reason: impl Into<String>) {
        self.injected_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.to_string(), reason.into());
    }

    /// Make every call fail as if the shard could not be reached
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Lose every per-operation state, like a shard process that restarted
    pub fn restart(&self) {
        let forgotten = {
            let mut operations = self.operations();
            let n = operations.len();
            operations.clear();
            n
        };
        info!(
            "Shard {}: restarted, {} operation states lost",
            self.shard_id, forgotten
        );
    }

    /// Number of instructions that changed state
    pub fn side_effects(&self) -> u64 {
        self.side_effects.load(Ordering::SeqCst)
    }

    pub fn writes_blocked(&self, operation_id: Uuid) -> bool {
        self.operations()
            .get(&(operation_id, ParticipantRole::Donor))
            .map_or(false, |s| s.writes_blocked)
    }

    /// Namespace the shard is building for `operation_id`, if it is a recipient
    pub fn working_namespace(&self, operation_id: Uuid) -> Option<Namespace> {
        self.operations()
            .get(&(operation_id, ParticipantRole::Recipient))
            .map(|s| s.temp_namespace.clone())
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed(format!(
                "shard {} is unreachable",
                self.shard_id
            )));
        }
        Ok(())
    }

    /// Accept or fence off an instruction
    pub fn handle(&self, instruction: &Instruction) -> Result<ParticipantReport> {
        self.check_reachable()?;
        if instruction.shard_id != self.shard_id {
            return Err(Error::InvalidRequest(format!(
                "instruction for {} delivered to {}",
                instruction.shard_id, self.shard_id
            )));
        }

        let key = (instruction.operation_id, instruction.role);
        let mut operations = self.operations();
        let state = operations
            .entry(key)
            .or_insert_with(|| ParticipantState::new(instruction));

        if instruction.sequence <= state.sequence {
            debug!(
                "Shard {}: fenced {} for operation {} (sequence {} <= {})",
                self.shard_id,
                instruction.command,
                instruction.operation_id,
                instruction.sequence,
                state.sequence
            );
            let mut report = self.report(key, state);
            report.duplicate = true;
            return Ok(report);
        }

        state.sequence = instruction.sequence;
        self.side_effects.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .injected_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(instruction.command.name());
        if let Some(reason) = injected {
            warn!(
                "Shard {}: {} failed for operation {}: {}",
                self.shard_id, instruction.command, instruction.operation_id, reason
            );
            state.status = ParticipantStatus::Error;
            state.error = Some(reason);
            return Ok(self.report(key, state));
        }

        match &instruction.command {
            Command::Prepare => {
                state.status = ParticipantStatus::Prepared;
            }
            Command::Clone { donors } => {
                info!(
                    "Shard {}: cloning {} into {} from {:?}",
                    self.shard_id, state.namespace, state.temp_namespace, donors
                );
                state.batches_done = 0;
                state.documents_copied = 0;
                state.status = if self.pacing.clone_batches == 0 {
                    ParticipantStatus::Cloned
                } else {
                    ParticipantStatus::Cloning
                };
            }
            Command::Apply => {
                state.status = ParticipantStatus::Applying;
                state.lag_ms = Some(self.pacing.initial_lag_ms.max(APPLYING_LAG_FLOOR_MS));
            }
            Command::BlockWrites => {
                info!(
                    "Shard {}: blocking writes to {}",
                    self.shard_id, state.namespace
                );
                state.writes_blocked = true;
                state.status = ParticipantStatus::WritesBlocked;
            }
            Command::Drain => {
                state.status = match state.lag_ms {
                    Some(0) | None => ParticipantStatus::Drained,
                    Some(_) => ParticipantStatus::Draining,
                };
                if state.status == ParticipantStatus::Drained {
                    state.lag_ms = Some(0);
                }
            }
            Command::Commit => {
                match instruction.role {
                    ParticipantRole::Recipient => info!(
                        "Shard {}: promoted {} to {}",
                        self.shard_id, state.temp_namespace, state.namespace
                    ),
                    ParticipantRole::Donor => info!(
                        "Shard {}: released data of {} and lifted write block",
                        self.shard_id, state.namespace
                    ),
                }
                state.writes_blocked = false;
                state.status = ParticipantStatus::Committed;
            }
        }

        Ok(self.report(key, state))
    }

    /// Current state of this shard's part in an operation. Each call moves
    /// simulated copying forward by one batch or lag step.
    pub fn status(&self, role: ParticipantRole, operation_id: Uuid) -> Result<ParticipantReport> {
        self.check_reachable()?;

        let key = (operation_id, role);
        let mut operations = self.operations();
        let Some(state) = operations.get_mut(&key) else {
            return Ok(ParticipantReport::unknown(
                operation_id,
                self.shard_id.clone(),
                role,
            ));
        };

        match state.status {
            ParticipantStatus::Cloning => {
                state.batches_done += 1;
                state.documents_copied += self.pacing.docs_per_batch;
                if state.batches_done >= self.pacing.clone_batches {
                    state.status = ParticipantStatus::Cloned;
                }
            }
            ParticipantStatus::Applying => {
                let lag = state.lag_ms.unwrap_or(self.pacing.initial_lag_ms);
                state.lag_ms = Some(
                    lag.saturating_sub(self.pacing.lag_step_ms)
                        .max(APPLYING_LAG_FLOOR_MS),
                );
            }
            ParticipantStatus::Draining => {
                let lag = state
                    .lag_ms
                    .unwrap_or(0)
                    .saturating_sub(self.pacing.lag_step_ms.max(1));
                state.lag_ms = Some(lag);
                if lag == 0 {
                    state.status = ParticipantStatus::Drained;
                }
            }
            _ => {}
        }

        Ok(self.report(key, state))
    }

    fn report(&self, key: StateKey, state: &ParticipantState) -> ParticipantReport {
        ParticipantReport {
            operation_id: key.0,
            shard_id: self.shard_id.clone(),
            role: key.1,
            sequence: state.sequence,
            status: state.status,
            documents_copied: state.documents_copied,
            lag_ms: state.lag_ms,
            error: state.error.clone(),
            duplicate: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacing() -> Pacing {
        Pacing {
            clone_batches: 2,
            docs_per_batch: 10,
            initial_lag_ms: 300,
            lag_step_ms: 200,
        }
    }

    fn instruction(role: ParticipantRole, sequence: u64, command: Command) -> Instruction {
        let namespace = Namespace::parse("shop.orders").unwrap();
        Instruction {
            operation_id: Uuid::nil(),
            temp_namespace: namespace.temporary_resharding(&Uuid::nil()),
            namespace,
            shard_id: "shard-1".into(),
            role,
            sequence,
            command,
        }
    }

    #[test]
    fn test_duplicate_instruction_has_no_side_effect() {
        let agent = ShardAgent::new("shard-1", pacing());
        let prepare = instruction(ParticipantRole::Donor, 1, Command::Prepare);

        let first = agent.handle(&prepare).unwrap();
        let second = agent.handle(&prepare).unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.status, ParticipantStatus::Prepared);
        assert_eq!(agent.side_effects(), 1);
    }

    #[test]
    fn test_older_instruction_is_fenced() {
        let agent = ShardAgent::new("shard-1", pacing());
        agent
            .handle(&instruction(ParticipantRole::Donor, 4, Command::BlockWrites))
            .unwrap();
        let report = agent
            .handle(&instruction(ParticipantRole::Donor, 1, Command::Prepare))
            .unwrap();
        assert!(report.duplicate);
        assert_eq!(report.status, ParticipantStatus::WritesBlocked);
        assert!(agent.writes_blocked(Uuid::nil()));
    }

    #[test]
    fn test_clone_progresses_per_poll() {
        let agent = ShardAgent::new("shard-1", pacing());
        let clone = Command::Clone {
            donors: vec!["shard-2".into()],
        };
        agent
            .handle(&instruction(ParticipantRole::Recipient, 2, clone))
            .unwrap();

        let first = agent.status(ParticipantRole::Recipient, Uuid::nil()).unwrap();
        assert_eq!(first.status, ParticipantStatus::Cloning);
        let second = agent.status(ParticipantRole::Recipient, Uuid::nil()).unwrap();
        assert_eq!(second.status, ParticipantStatus::Cloned);
        assert_eq!(second.documents_copied, 20);
    }

    #[test]
    fn test_lag_reaches_zero_only_when_draining() {
        let agent = ShardAgent::new("shard-1", pacing());
        agent
            .handle(&instruction(ParticipantRole::Recipient, 3, Command::Apply))
            .unwrap();
        for _ in 0..5 {
            agent.status(ParticipantRole::Recipient, Uuid::nil()).unwrap();
        }
        let applying = agent.status(ParticipantRole::Recipient, Uuid::nil()).unwrap();
        assert_eq!(applying.lag_ms, Some(APPLYING_LAG_FLOOR_MS));

        let drain = agent
            .handle(&instruction(ParticipantRole::Recipient, 4, Command::Drain))
            .unwrap();
        assert_eq!(drain.status, ParticipantStatus::Draining);
        let drained = agent.status(ParticipantRole::Recipient, Uuid::nil()).unwrap();
        assert_eq!(drained.status, ParticipantStatus::Drained);
        assert_eq!(drained.lag_ms, Some(0));
    }

    #[test]
    fn test_injected_failure_and_unreachable() {
        let agent = ShardAgent::new("shard-1", pacing());
        agent.fail_on("prepare", "disk full");
        let report = agent
            .handle(&instruction(ParticipantRole::Donor, 1, Command::Prepare))
            .unwrap();
        assert_eq!(report.status, ParticipantStatus::Error);
        assert_eq!(report.error.as_deref(), Some("disk full"));

        agent.set_unreachable(true);
        let err = agent
            .status(ParticipantRole::Donor, Uuid::nil())
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unknown_operation_reports_pending() {
        let agent = ShardAgent::new("shard-1", pacing());
        let report = agent
            .status(ParticipantRole::Recipient, Uuid::new_v4())
            .unwrap();
        assert_eq!(report.sequence, 0);
        assert_eq!(report.status, ParticipantStatus::Pending);
    }
}
