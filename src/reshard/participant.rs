//! Coordinator to shard protocol
//!
//! Every instruction carries the operation id and the sequence of the phase
//! that issued it. A shard accepts an instruction only if its sequence is
//! greater than the last one it accepted for that operation and role, so
//! resending is always safe.

use crate::common::Result;
use crate::reshard::record::{OperationRecord, ParticipantRole, ParticipantStatus};
use crate::reshard::types::{Namespace, ShardId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    /// Donor: open a change stream. Recipient: create the working collection.
    Prepare,
    /// Recipient: copy a snapshot from the donors
    Clone { donors: Vec<ShardId> },
    /// Recipient: apply buffered changes
    Apply,
    /// Donor: reject writes to the source collection
    BlockWrites,
    /// Recipient: apply the remaining changes down to zero lag
    Drain,
    /// Recipient: promote the working collection. Donor: drop obsolete data
    /// and lift the write block.
    Commit,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Prepare => "prepare",
            Command::Clone { .. } => "clone",
            Command::Apply => "apply",
            Command::BlockWrites => "block-writes",
            Command::Drain => "drain",
            Command::Commit => "commit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub operation_id: Uuid,
    pub namespace: Namespace,
    pub temp_namespace: Namespace,
    pub shard_id: ShardId,
    pub role: ParticipantRole,
    pub sequence: u64,
    pub command: Command,
}

impl Instruction {
    /// Instruction for one participant at the record's current sequence
    pub fn for_participant(
        record: &OperationRecord,
        role: ParticipantRole,
        shard_id: &str,
        command: Command,
    ) -> Self {
        Self {
            operation_id: record.id(),
            namespace: record.namespace().clone(),
            temp_namespace: record.metadata.temp_namespace.clone(),
            shard_id: shard_id.to_string(),
            role,
            sequence: record.sequence,
            command,
        }
    }
}

/// What a shard says about its part in an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantReport {
    pub operation_id: Uuid,
    pub shard_id: ShardId,
    pub role: ParticipantRole,
    /// Last instruction sequence the shard accepted, 0 if none
    pub sequence: u64,
    pub status: ParticipantStatus,
    #[serde(default)]
    pub documents_copied: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lag_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the instruction was fenced off as already accepted
    #[serde(default)]
    pub duplicate: bool,
}

impl ParticipantReport {
    /// Report of a shard that never heard of the operation
    pub fn unknown(operation_id: Uuid, shard_id: impl Into<ShardId>, role: ParticipantRole) -> Self {
        Self {
            operation_id,
            shard_id: shard_id.into(),
            role,
            sequence: 0,
            status: ParticipantStatus::Pending,
            documents_copied: 0,
            lag_ms: None,
            error: None,
            duplicate: false,
        }
    }
}

/// Transport to the shards
#[async_trait]
pub trait ParticipantClient: Send + Sync {
    async fn send(&self, instruction: &Instruction) -> Result<ParticipantReport>;

    async fn status(
        &self,
        shard_id: &str,
        role: ParticipantRole,
        operation_id: Uuid,
    ) -> Result<ParticipantReport>;
}
