//! Phase handler table
//!
//! Each non-terminal phase has a handler that looks at the record and either
//! declares the phase complete or lists the actions still needed. [`step`]
//! folds participant feedback into the record, advances at most one phase and
//! returns the actions for the phase the record ends up in. No I/O happens
//! here; the state machine driver executes the actions and feeds the results
//! back in on the next step.

use crate::common::OperationFailure;
use crate::reshard::participant::{Command, Instruction, ParticipantReport};
use crate::reshard::placement::Placement;
use crate::reshard::record::{
    OperationRecord, Participant, ParticipantRole, ParticipantStatus, Phase,
};
use crate::reshard::types::ShardId;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Work out donors and recipients from the catalog
    ResolveParticipants,
    Dispatch(Instruction),
    Poll {
        shard_id: ShardId,
        role: ParticipantRole,
    },
    /// Switch the catalog to the new routing
    CommitRouting,
}

impl Action {
    pub fn is_poll(&self) -> bool {
        matches!(self, Action::Poll { .. })
    }
}

/// Result of executing an action
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    Resolved(Placement),
    Report(ParticipantReport),
    RoutingCommitted,
    Failed(OperationFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSettings {
    /// Recipients must be at or below this lag to leave `Applying`
    pub apply_lag_threshold_ms: u64,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            apply_lag_threshold_ms: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhaseStep {
    pub record: OperationRecord,
    pub actions: Vec<Action>,
    pub advanced: bool,
}

enum Plan {
    Complete,
    Pending(Vec<Action>),
}

struct PhaseHandler {
    phase: Phase,
    plan: fn(&OperationRecord, &PhaseSettings) -> Plan,
    /// Runs on the record right before it leaves the phase
    finish: Option<fn(&mut OperationRecord)>,
}

const HANDLERS: [PhaseHandler; 6] = [
    PhaseHandler {
        phase: Phase::Initializing,
        plan: plan_initializing,
        finish: None,
    },
    PhaseHandler {
        phase: Phase::PreparingToDonate,
        plan: plan_preparing,
        finish: None,
    },
    PhaseHandler {
        phase: Phase::Cloning,
        plan: plan_cloning,
        finish: None,
    },
    PhaseHandler {
        phase: Phase::Applying,
        plan: plan_applying,
        finish: None,
    },
    PhaseHandler {
        phase: Phase::BlockingWrites,
        plan: plan_blocking_writes,
        finish: None,
    },
    PhaseHandler {
        phase: Phase::Committing,
        plan: plan_committing,
        finish: Some(finish_committing),
    },
];

fn handler(phase: Phase) -> Option<&'static PhaseHandler> {
    HANDLERS.iter().find(|h| h.phase == phase)
}

/// Fold `feedback` into `record` and work out what happens next
pub fn step(
    mut record: OperationRecord,
    feedback: Vec<Feedback>,
    settings: &PhaseSettings,
) -> PhaseStep {
    for item in feedback {
        absorb(&mut record, item);
    }

    let mut advanced = false;
    loop {
        let Some(handler) = handler(record.phase) else {
            return PhaseStep {
                record,
                actions: Vec::new(),
                advanced,
            };
        };

        match (handler.plan)(&record, settings) {
            Plan::Pending(actions) => {
                return PhaseStep {
                    record,
                    actions,
                    advanced,
                }
            }
            Plan::Complete if advanced => {
                // A phase that is complete on entry still gets persisted
                // before anything else happens.
                return PhaseStep {
                    record,
                    actions: Vec::new(),
                    advanced,
                };
            }
            Plan::Complete => {
                if let Some(finish) = handler.finish {
                    finish(&mut record);
                }
                record.advance();
                advanced = true;
            }
        }
    }
}

fn absorb(record: &mut OperationRecord, feedback: Feedback) {
    if record.is_terminal() {
        return;
    }

    match feedback {
        Feedback::Resolved(placement) => {
            if record.phase != Phase::Initializing
                || !record.donors.is_empty()
                || !record.recipients.is_empty()
            {
                return;
            }
            record.donors = placement.donors.into_iter().map(Participant::new).collect();
            record.recipients = placement
                .recipients
                .into_iter()
                .map(Participant::new)
                .collect();
        }
        Feedback::Report(report) => absorb_report(record, report),
        Feedback::RoutingCommitted => {
            if record.phase == Phase::Committing {
                record.routing_committed = true;
            }
        }
        Feedback::Failed(failure) => record.fail(failure),
    }
}

fn absorb_report(record: &mut OperationRecord, report: ParticipantReport) {
    if report.operation_id != record.id() {
        warn!(
            "Ignoring report for operation {} while driving {}",
            report.operation_id,
            record.id()
        );
        return;
    }

    let operation_id = record.id();
    if report.sequence > record.sequence {
        warn!(
            "Operation {}: {} {} reports sequence {} ahead of {}",
            operation_id, report.role, report.shard_id, report.sequence, record.sequence
        );
        return;
    }

    let record_sequence = record.sequence;
    let Some(participant) = record.participant_mut(report.role, &report.shard_id) else {
        warn!(
            "Operation {}: report from {} {} which is not a participant",
            operation_id, report.role, report.shard_id
        );
        return;
    };

    if report.sequence < participant.sequence {
        if participant.sequence < record_sequence {
            debug!(
                "Operation {}: stale report from {} {} (sequence {} < {})",
                operation_id, report.role, report.shard_id, report.sequence, participant.sequence
            );
            return;
        }
        // The shard forgot an instruction it accepted for this phase, so it
        // gets dispatched again. The fence on the shard keeps that safe.
        warn!(
            "Operation {}: {} {} lost sequence {} (now at {}), resending",
            operation_id, report.role, report.shard_id, participant.sequence, report.sequence
        );
        participant.sequence = report.sequence;
        participant.status = report.status;
        participant.documents_copied = report.documents_copied;
        participant.lag_ms = report.lag_ms;
        return;
    }

    participant.sequence = report.sequence;
    participant.status = report.status;
    participant.documents_copied = report.documents_copied;
    participant.lag_ms = report.lag_ms;
    participant.last_error = report.error.clone();

    if report.status == ParticipantStatus::Error {
        let reason = report
            .error
            .unwrap_or_else(|| "participant reported an error".to_string());
        record.fail(OperationFailure::participant(report.shard_id, reason));
    }
}

/// Dispatch `command` to every participant of `role` that has not accepted
/// this phase yet, poll the ones that accepted but are not `done`.
/// Returns whether all of them are done.
fn drive(
    record: &OperationRecord,
    role: ParticipantRole,
    command: &Command,
    done: &dyn Fn(&Participant) -> bool,
    actions: &mut Vec<Action>,
) -> bool {
    let mut all_done = true;
    for p in record.participants(role) {
        if p.sequence < record.sequence {
            actions.push(Action::Dispatch(Instruction::for_participant(
                record,
                role,
                &p.shard_id,
                command.clone(),
            )));
            all_done = false;
        } else if !done(p) {
            actions.push(Action::Poll {
                shard_id: p.shard_id.clone(),
                role,
            });
            all_done = false;
        }
    }
    all_done
}

fn pending_or_complete(all_done: bool, actions: Vec<Action>) -> Plan {
    if all_done {
        Plan::Complete
    } else {
        Plan::Pending(actions)
    }
}

fn has_status(status: ParticipantStatus) -> impl Fn(&Participant) -> bool {
    move |p| p.status == status
}

fn plan_initializing(record: &OperationRecord, _: &PhaseSettings) -> Plan {
    if record.donors.is_empty() || record.recipients.is_empty() {
        Plan::Pending(vec![Action::ResolveParticipants])
    } else {
        Plan::Complete
    }
}

fn plan_preparing(record: &OperationRecord, _: &PhaseSettings) -> Plan {
    let mut actions = Vec::new();
    let prepared = has_status(ParticipantStatus::Prepared);
    let donors = drive(record, ParticipantRole::Donor, &Command::Prepare, &prepared, &mut actions);
    let recipients = drive(
        record,
        ParticipantRole::Recipient,
        &Command::Prepare,
        &prepared,
        &mut actions,
    );
    pending_or_complete(donors && recipients, actions)
}

fn plan_cloning(record: &OperationRecord, _: &PhaseSettings) -> Plan {
    let mut actions = Vec::new();
    let command = Command::Clone {
        donors: record.donors.iter().map(|p| p.shard_id.clone()).collect(),
    };
    let done = drive(
        record,
        ParticipantRole::Recipient,
        &command,
        &has_status(ParticipantStatus::Cloned),
        &mut actions,
    );
    pending_or_complete(done, actions)
}

fn plan_applying(record: &OperationRecord, settings: &PhaseSettings) -> Plan {
    let mut actions = Vec::new();
    let threshold = settings.apply_lag_threshold_ms;
    let caught_up = move |p: &Participant| {
        p.status == ParticipantStatus::Applying && p.lag_ms.map_or(false, |lag| lag <= threshold)
    };
    let done = drive(
        record,
        ParticipantRole::Recipient,
        &Command::Apply,
        &caught_up,
        &mut actions,
    );
    pending_or_complete(done, actions)
}

fn plan_blocking_writes(record: &OperationRecord, _: &PhaseSettings) -> Plan {
    let mut actions = Vec::new();
    let blocked = drive(
        record,
        ParticipantRole::Donor,
        &Command::BlockWrites,
        &has_status(ParticipantStatus::WritesBlocked),
        &mut actions,
    );
    if !blocked {
        return Plan::Pending(actions);
    }

    let drained = drive(
        record,
        ParticipantRole::Recipient,
        &Command::Drain,
        &|p: &Participant| p.status == ParticipantStatus::Drained && p.lag_ms.unwrap_or(0) == 0,
        &mut actions,
    );
    pending_or_complete(drained, actions)
}

fn plan_committing(record: &OperationRecord, _: &PhaseSettings) -> Plan {
    if !record.routing_committed {
        return Plan::Pending(vec![Action::CommitRouting]);
    }

    let mut actions = Vec::new();
    let committed = has_status(ParticipantStatus::Committed);
    let recipients = drive(
        record,
        ParticipantRole::Recipient,
        &Command::Commit,
        &committed,
        &mut actions,
    );
    let donors = drive(record, ParticipantRole::Donor, &Command::Commit, &committed, &mut actions);
    pending_or_complete(recipients && donors, actions)
}

fn finish_committing(record: &mut OperationRecord) {
    record.result = Some(record.build_result());
}
