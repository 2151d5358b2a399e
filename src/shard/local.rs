//! In-process participant client
//!
//! Routes instructions straight to [`ShardAgent`]s living in the same
//! process. Used by tests and single-process demos.

use crate::common::{Error, Result};
use crate::reshard::participant::{Instruction, ParticipantClient, ParticipantReport};
use crate::reshard::record::ParticipantRole;
use crate::shard::agent::{Pacing, ShardAgent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default, Clone)]
pub struct LocalParticipants {
    agents: HashMap<String, Arc<ShardAgent>>,
}

impl LocalParticipants {
    pub fn new() -> Self {
        Self::default()
    }

    /// One agent per shard id, all with the same pacing
    pub fn with_shards<'a>(ids: impl IntoIterator<Item = &'a str>, pacing: Pacing) -> Self {
        let mut participants = Self::new();
        for id in ids {
            participants.add(Arc::new(ShardAgent::new(id, pacing)));
        }
        participants
    }

    pub fn add(&mut self, agent: Arc<ShardAgent>) {
        self.agents.insert(agent.shard_id().to_string(), agent);
    }

    pub fn agent(&self, shard_id: &str) -> Option<&Arc<ShardAgent>> {
        self.agents.get(shard_id)
    }

    fn resolve(&self, shard_id: &str) -> Result<&Arc<ShardAgent>> {
        self.agents
            .get(shard_id)
            .ok_or_else(|| Error::ConnectionFailed(format!("no route to shard {}", shard_id)))
    }
}

#[async_trait]
impl ParticipantClient for LocalParticipants {
    async fn send(&self, instruction: &Instruction) -> Result<ParticipantReport> {
        self.resolve(&instruction.shard_id)?.handle(instruction)
    }

    async fn status(
        &self,
        shard_id: &str,
        role: ParticipantRole,
        operation_id: Uuid,
    ) -> Result<ParticipantReport> {
        self.resolve(shard_id)?.status(role, operation_id)
    }
}
