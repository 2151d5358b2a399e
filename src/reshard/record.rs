//! The durable operation record
//!
//! One `OperationRecord` describes one resharding end to end. It is written
//! only by the coordinator instance that owns it and persisted after every
//! transition.

use crate::common::{timestamp_now_millis, FailureCode, OperationFailure};
use crate::reshard::completion::Completion;
use crate::reshard::types::{
    ChunkRange, CollectionIdentity, KeyPattern, Namespace, ShardId, ZoneRange,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Coordinator phase. Declaration order is the progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Initializing,
    PreparingToDonate,
    Cloning,
    Applying,
    BlockingWrites,
    Committing,
    Done,
    Error,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Initializing,
        Phase::PreparingToDonate,
        Phase::Cloning,
        Phase::Applying,
        Phase::BlockingWrites,
        Phase::Committing,
        Phase::Done,
        Phase::Error,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }

    /// Successor on the success path
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Initializing => Some(Phase::PreparingToDonate),
            Phase::PreparingToDonate => Some(Phase::Cloning),
            Phase::Cloning => Some(Phase::Applying),
            Phase::Applying => Some(Phase::BlockingWrites),
            Phase::BlockingWrites => Some(Phase::Committing),
            Phase::Committing => Some(Phase::Done),
            Phase::Done | Phase::Error => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::PreparingToDonate => "preparing-to-donate",
            Phase::Cloning => "cloning",
            Phase::Applying => "applying",
            Phase::BlockingWrites => "blocking-writes",
            Phase::Committing => "committing",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Donor,
    Recipient,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Donor => "donor",
            ParticipantRole::Recipient => "recipient",
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParticipantRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "donor" => Ok(ParticipantRole::Donor),
            "recipient" => Ok(ParticipantRole::Recipient),
            other => Err(crate::Error::InvalidRequest(format!(
                "unknown participant role: {}",
                other
            ))),
        }
    }
}

/// Progress of one participant as last reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantStatus {
    Pending,
    Prepared,
    Cloning,
    Cloned,
    Applying,
    WritesBlocked,
    Draining,
    Drained,
    Committed,
    Error,
}

/// A donor or recipient shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub shard_id: ShardId,
    pub status: ParticipantStatus,
    /// Last instruction sequence the shard acknowledged
    pub sequence: u64,
    #[serde(default)]
    pub documents_copied: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lag_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Participant {
    pub fn new(shard_id: impl Into<ShardId>) -> Self {
        Self {
            shard_id: shard_id.into(),
            status: ParticipantStatus::Pending,
            sequence: 0,
            documents_copied: 0,
            lag_ms: None,
            last_error: None,
        }
    }
}

/// Immutable identity of one resharding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetadata {
    pub operation_id: Uuid,
    pub source: CollectionIdentity,
    pub key_pattern: KeyPattern,
    pub temp_namespace: Namespace,
}

/// Payload handed to callers once an operation reaches `Done`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshardingResult {
    pub operation_id: Uuid,
    pub namespace: Namespace,
    pub new_collection_uuid: Uuid,
    pub key_pattern: KeyPattern,
    pub donors: Vec<ShardId>,
    pub recipients: Vec<ShardId>,
    pub documents_copied: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub metadata: OperationMetadata,
    pub phase: Phase,
    /// Bumped on every transition; carried by every instruction of the phase
    pub sequence: u64,
    pub donors: Vec<Participant>,
    pub recipients: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<ZoneRange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_chunks: Option<Vec<ChunkRange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_initial_chunks: Option<u32>,
    #[serde(default)]
    pub routing_committed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<OperationFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ReshardingResult>,
    pub created_at: u64,
    pub updated_at: u64,
    pub phase_started_at: u64,
}

impl OperationRecord {
    pub fn new(metadata: OperationMetadata) -> Self {
        let now = timestamp_now_millis();
        Self {
            metadata,
            phase: Phase::Initializing,
            sequence: 0,
            donors: Vec::new(),
            recipients: Vec::new(),
            zones: None,
            preset_chunks: None,
            num_initial_chunks: None,
            routing_committed: false,
            failure: None,
            result: None,
            created_at: now,
            updated_at: now,
            phase_started_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.metadata.operation_id
    }

    pub fn source(&self) -> &CollectionIdentity {
        &self.metadata.source
    }

    pub fn namespace(&self) -> &Namespace {
        &self.metadata.source.namespace
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn participants(&self, role: ParticipantRole) -> &[Participant] {
        match role {
            ParticipantRole::Donor => &self.donors,
            ParticipantRole::Recipient => &self.recipients,
        }
    }

    pub fn participant_mut(
        &mut self,
        role: ParticipantRole,
        shard_id: &str,
    ) -> Option<&mut Participant> {
        let list = match role {
            ParticipantRole::Donor => &mut self.donors,
            ParticipantRole::Recipient => &mut self.recipients,
        };
        list.iter_mut().find(|p| p.shard_id == shard_id)
    }

    /// Move to the successor phase
    pub fn advance(&mut self) -> bool {
        match self.phase.next() {
            Some(next) => {
                self.phase = next;
                self.sequence += 1;
                self.phase_started_at = timestamp_now_millis();
                true
            }
            None => false,
        }
    }

    /// Move to `Error`. Terminal records are left untouched.
    pub fn fail(&mut self, failure: OperationFailure) {
        if self.is_terminal() {
            return;
        }
        self.phase = Phase::Error;
        self.sequence += 1;
        self.phase_started_at = timestamp_now_millis();
        self.failure = Some(failure);
    }

    /// Terminal outcome, if any
    pub fn completion(&self) -> Option<Completion> {
        match self.phase {
            Phase::Done => Some(self.result.clone().ok_or_else(|| {
                OperationFailure::new(FailureCode::Internal, "done without a result")
            })),
            Phase::Error => Some(Err(self.failure.clone().unwrap_or_else(|| {
                OperationFailure::new(FailureCode::Internal, "failed without a reason")
            }))),
            _ => None,
        }
    }

    /// Checks that a persisted record can be resumed from its phase
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let expected_temp = self
            .metadata
            .source
            .namespace
            .temporary_resharding(&self.metadata.source.uuid);
        if self.metadata.temp_namespace != expected_temp {
            return Err(format!(
                "working namespace {} does not belong to {}",
                self.metadata.temp_namespace, self.metadata.source
            ));
        }

        let populated = !self.donors.is_empty() || !self.recipients.is_empty();
        match self.phase {
            Phase::Initializing if populated => {
                return Err("participants recorded before initialization finished".into());
            }
            Phase::Initializing => {}
            _ if self.donors.is_empty() || self.recipients.is_empty() => {
                return Err(format!(
                    "phase {} requires donors and recipients, found {} and {}",
                    self.phase,
                    self.donors.len(),
                    self.recipients.len()
                ));
            }
            _ => {}
        }

        for role in [ParticipantRole::Donor, ParticipantRole::Recipient] {
            let mut seen = HashSet::new();
            for p in self.participants(role) {
                if !seen.insert(p.shard_id.as_str()) {
                    return Err(format!("{} {} listed twice", role, p.shard_id));
                }
                if p.sequence > self.sequence {
                    return Err(format!(
                        "{} {} acknowledged sequence {} beyond operation sequence {}",
                        role, p.shard_id, p.sequence, self.sequence
                    ));
                }
            }
        }

        if self.routing_committed && self.phase < Phase::Committing {
            return Err(format!("routing committed during phase {}", self.phase));
        }

        Ok(())
    }

    /// Assemble the success payload from the participant lists
    pub fn build_result(&self) -> ReshardingResult {
        ReshardingResult {
            operation_id: self.id(),
            namespace: self.namespace().clone(),
            new_collection_uuid: self.id(),
            key_pattern: self.metadata.key_pattern.clone(),
            donors: self.donors.iter().map(|p| p.shard_id.clone()).collect(),
            recipients: self.recipients.iter().map(|p| p.shard_id.clone()).collect(),
            documents_copied: self.recipients.iter().map(|p| p.documents_copied).sum(),
        }
    }
}
