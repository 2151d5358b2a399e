//! Participant placement
//!
//! Donors are the shards that own chunks of the collection today. Recipients
//! come from the explicit preset if there is one, else from the shards
//! carrying the requested zones, else from the writable shards, capped by the
//! initial chunk count and ranked by HRW hashing on the operation id.

use crate::common::{select_nodes, Error, Result};
use crate::reshard::catalog::ShardInfo;
use crate::reshard::record::OperationRecord;
use crate::reshard::types::ShardId;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub donors: Vec<ShardId>,
    pub recipients: Vec<ShardId>,
}

/// Resolve both participant lists for an `Initializing` record
pub fn resolve_participants(
    record: &OperationRecord,
    owning_shards: &[ShardId],
    shards: &[ShardInfo],
) -> Result<Placement> {
    Ok(Placement {
        donors: select_donors(owning_shards, shards)?,
        recipients: select_recipients(record, shards)?,
    })
}

/// Every owning shard donates, so each must still be able to serve reads
pub fn select_donors(owning_shards: &[ShardId], shards: &[ShardInfo]) -> Result<Vec<ShardId>> {
    if owning_shards.is_empty() {
        return Err(Error::Internal("collection has no owning shards".into()));
    }

    let by_id: HashMap<&str, &ShardInfo> = shards.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut donors = Vec::with_capacity(owning_shards.len());
    for id in owning_shards {
        match by_id.get(id.as_str()) {
            Some(shard) if shard.state.can_read() => {
                if !donors.contains(id) {
                    donors.push(id.clone());
                }
            }
            Some(shard) => {
                return Err(Error::ParticipantFailure {
                    shard: id.clone(),
                    reason: format!("donor shard is {}", shard.state),
                })
            }
            None => {
                return Err(Error::ParticipantFailure {
                    shard: id.clone(),
                    reason: "donor shard is not registered".into(),
                })
            }
        }
    }
    Ok(donors)
}

pub fn select_recipients(record: &OperationRecord, shards: &[ShardInfo]) -> Result<Vec<ShardId>> {
    if let Some(chunks) = &record.preset_chunks {
        let mut recipients: Vec<ShardId> = Vec::new();
        for chunk in chunks {
            let id = &chunk.recipient_shard_id;
            if recipients.contains(id) {
                continue;
            }
            let shard = shards.iter().find(|s| &s.id == id).ok_or_else(|| {
                Error::ParticipantFailure {
                    shard: id.clone(),
                    reason: "recipient shard is not registered".into(),
                }
            })?;
            if !shard.state.can_write() {
                return Err(Error::ParticipantFailure {
                    shard: id.clone(),
                    reason: format!("recipient shard is {}", shard.state),
                });
            }
            recipients.push(id.clone());
        }
        return Ok(recipients);
    }

    let writable: Vec<&ShardInfo> = shards.iter().filter(|s| s.state.can_write()).collect();

    if let Some(zones) = record.zones.as_ref().filter(|z| !z.is_empty()) {
        let mut recipients: Vec<ShardId> = Vec::new();
        for zone in zones {
            let mut carriers = writable
                .iter()
                .filter(|s| s.zones.iter().any(|z| z == &zone.zone))
                .peekable();
            if carriers.peek().is_none() {
                return Err(Error::InvalidRequest(format!(
                    "no writable shard carries zone {}",
                    zone.zone
                )));
            }
            for shard in carriers {
                if !recipients.contains(&shard.id) {
                    recipients.push(shard.id.clone());
                }
            }
        }
        recipients.sort();
        return Ok(recipients);
    }

    let mut candidates: Vec<ShardId> = writable.iter().map(|s| s.id.clone()).collect();
    if candidates.is_empty() {
        return Err(Error::Internal("no shard can receive data".into()));
    }
    candidates.sort();

    match record.num_initial_chunks {
        Some(n) if (n as usize) < candidates.len() => {
            let mut chosen = select_nodes(&record.id().to_string(), &candidates, n as usize);
            chosen.sort();
            Ok(chosen)
        }
        _ => Ok(candidates),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeState;
    use crate::reshard::record::OperationMetadata;
    use crate::reshard::types::{
        max_key, min_key, ChunkRange, CollectionIdentity, Namespace, ZoneRange,
    };
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn mock_shard(id: &str, state: NodeState, zones: &[&str]) -> ShardInfo {
        ShardInfo {
            id: id.to_string(),
            address: format!("http://localhost/{}", id),
            state,
            zones: zones.iter().map(|z| z.to_string()).collect(),
        }
    }

    fn record() -> OperationRecord {
        let namespace = Namespace::parse("shop.orders").unwrap();
        let uuid = Uuid::new_v4();
        OperationRecord::new(OperationMetadata {
            operation_id: Uuid::new_v4(),
            temp_namespace: namespace.temporary_resharding(&uuid),
            source: CollectionIdentity { namespace, uuid },
            key_pattern: serde_json::from_value(json!({"region": 1})).unwrap(),
        })
    }

    fn bound(v: Value) -> serde_json::Map<String, Value> {
        match json!({ "region": v }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn cluster() -> Vec<ShardInfo> {
        vec![
            mock_shard("shard-1", NodeState::Alive, &["east"]),
            mock_shard("shard-2", NodeState::Alive, &["west"]),
            mock_shard("shard-3", NodeState::Draining, &["east"]),
            mock_shard("shard-4", NodeState::Alive, &[]),
        ]
    }

    #[test]
    fn test_draining_shard_donates_but_does_not_receive() {
        let owners = vec!["shard-1".to_string(), "shard-2".into(), "shard-3".into()];
        let placement = resolve_participants(&record(), &owners, &cluster()).unwrap();
        assert_eq!(placement.donors, owners);
        assert_eq!(placement.recipients, vec!["shard-1", "shard-2", "shard-4"]);
    }

    #[test]
    fn test_dead_donor_is_a_participant_failure() {
        let mut shards = cluster();
        shards[1].state = NodeState::Dead;
        let owners = vec!["shard-1".to_string(), "shard-2".into()];
        match select_donors(&owners, &shards) {
            Err(Error::ParticipantFailure { shard, .. }) => assert_eq!(shard, "shard-2"),
            other => panic!("expected ParticipantFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_preset_decides_recipients() {
        let mut rec = record();
        rec.preset_chunks = Some(vec![
            ChunkRange {
                recipient_shard_id: "shard-4".into(),
                min: bound(min_key()),
                max: bound(json!("m")),
            },
            ChunkRange {
                recipient_shard_id: "shard-2".into(),
                min: bound(json!("m")),
                max: bound(max_key()),
            },
        ]);
        assert_eq!(
            select_recipients(&rec, &cluster()).unwrap(),
            vec!["shard-4", "shard-2"]
        );
    }

    #[test]
    fn test_zones_pick_writable_carriers() {
        let mut rec = record();
        rec.zones = Some(vec![ZoneRange {
            zone: "east".into(),
            min: bound(min_key()),
            max: bound(max_key()),
        }]);
        assert_eq!(select_recipients(&rec, &cluster()).unwrap(), vec!["shard-1"]);

        rec.zones = Some(vec![ZoneRange {
            zone: "north".into(),
            min: bound(min_key()),
            max: bound(max_key()),
        }]);
        assert!(select_recipients(&rec, &cluster()).is_err());
    }

    #[test]
    fn test_initial_chunks_cap_is_deterministic() {
        let mut rec = record();
        rec.num_initial_chunks = Some(2);
        let first = select_recipients(&rec, &cluster()).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, select_recipients(&rec, &cluster()).unwrap());
        assert!(!first.contains(&"shard-3".to_string()));
    }

    #[test]
    fn test_no_writable_shards() {
        let shards = vec![mock_shard("shard-1", NodeState::Dead, &[])];
        assert!(select_recipients(&record(), &shards).is_err());
    }
}
