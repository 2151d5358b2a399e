//! Collection routing catalog
//!
//! The catalog answers "who owns this collection today" and accepts the
//! routing switch at commit. The RocksDB metadata store implements it for
//! the running coordinator; [`InMemoryCatalog`] backs tests.

use crate::common::{timestamp_now_millis, Error, NodeState, Result};
use crate::reshard::record::OperationRecord;
use crate::reshard::types::{CollectionIdentity, KeyPattern, Namespace, ShardId, ZoneRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// A shard known to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub id: ShardId,
    pub address: String,
    pub state: NodeState,
    #[serde(default)]
    pub zones: Vec<String>,
}

impl ShardInfo {
    pub fn new(id: impl Into<ShardId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            state: NodeState::Alive,
            zones: Vec::new(),
        }
    }
}

/// Routing entry of one sharded collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub namespace: Namespace,
    pub uuid: Uuid,
    pub key_pattern: KeyPattern,
    /// Shards owning at least one chunk
    pub shards: Vec<ShardId>,
    #[serde(default)]
    pub zones: Vec<ZoneRange>,
    #[serde(default)]
    pub epoch: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl CollectionEntry {
    pub fn new(namespace: Namespace, key_pattern: KeyPattern, shards: Vec<ShardId>) -> Self {
        Self {
            namespace,
            uuid: Uuid::new_v4(),
            key_pattern,
            shards,
            zones: Vec::new(),
            epoch: 1,
            updated_at: timestamp_now_millis(),
        }
    }

    pub fn identity(&self) -> CollectionIdentity {
        CollectionIdentity {
            namespace: self.namespace.clone(),
            uuid: self.uuid,
        }
    }

    pub fn routing_info(&self) -> RoutingInfo {
        RoutingInfo {
            collection: self.identity(),
            key_pattern: self.key_pattern.clone(),
            shards: self.shards.clone(),
        }
    }

    /// Switch routing to the resharded collection.
    ///
    /// Returns `Ok(false)` if this operation already committed.
    pub fn apply_resharding(&mut self, record: &OperationRecord) -> Result<bool> {
        if self.uuid == record.id() {
            return Ok(false);
        }
        if self.uuid != record.source().uuid {
            return Err(Error::ConflictingOperation(format!(
                "collection {} is at uuid {}, operation {} expected {}",
                self.namespace,
                self.uuid,
                record.id(),
                record.source().uuid
            )));
        }

        self.uuid = record.id();
        self.key_pattern = record.metadata.key_pattern.clone();
        self.shards = record
            .recipients
            .iter()
            .map(|p| p.shard_id.clone())
            .collect();
        self.zones = record.zones.clone().unwrap_or_default();
        self.epoch += 1;
        self.updated_at = timestamp_now_millis();
        Ok(true)
    }
}

/// What the builder and the Initializing phase need to know
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingInfo {
    pub collection: CollectionIdentity,
    pub key_pattern: KeyPattern,
    pub shards: Vec<ShardId>,
}

pub trait CatalogClient: Send + Sync {
    fn routing_info(&self, namespace: &Namespace) -> Result<RoutingInfo>;

    fn zones_for_collection(&self, namespace: &Namespace) -> Result<Vec<ZoneRange>>;

    fn list_shards(&self) -> Result<Vec<ShardInfo>>;

    /// Idempotently point the collection at the recipients under the new key
    fn commit_resharding(&self, record: &OperationRecord) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    collections: RwLock<HashMap<Namespace, CollectionEntry>>,
    shards: RwLock<BTreeMap<ShardId, ShardInfo>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_collection(&self, entry: CollectionEntry) {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.namespace.clone(), entry);
    }

    pub fn collection(&self, namespace: &Namespace) -> Option<CollectionEntry> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }

    pub fn put_shard(&self, shard: ShardInfo) {
        self.shards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(shard.id.clone(), shard);
    }

    fn entry(&self, namespace: &Namespace) -> Result<CollectionEntry> {
        self.collection(namespace)
            .ok_or_else(|| Error::NotFound(format!("collection {}", namespace)))
    }
}

impl CatalogClient for InMemoryCatalog {
    fn routing_info(&self, namespace: &Namespace) -> Result<RoutingInfo> {
        Ok(self.entry(namespace)?.routing_info())
    }

    fn zones_for_collection(&self, namespace: &Namespace) -> Result<Vec<ZoneRange>> {
        Ok(self.entry(namespace)?.zones)
    }

    fn list_shards(&self) -> Result<Vec<ShardInfo>> {
        Ok(self
            .shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    fn commit_resharding(&self, record: &OperationRecord) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = collections
            .get_mut(record.namespace())
            .ok_or_else(|| Error::NotFound(format!("collection {}", record.namespace())))?;
        entry.apply_resharding(record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshard::record::{OperationMetadata, Participant};
    use serde_json::json;

    fn entry() -> CollectionEntry {
        CollectionEntry::new(
            Namespace::parse("shop.orders").unwrap(),
            serde_json::from_value(json!({"_id": 1})).unwrap(),
            vec!["shard-1".into(), "shard-2".into()],
        )
    }

    fn record_for(entry: &CollectionEntry) -> OperationRecord {
        let mut record = OperationRecord::new(OperationMetadata {
            operation_id: Uuid::new_v4(),
            source: entry.identity(),
            key_pattern: serde_json::from_value(json!({"region": 1})).unwrap(),
            temp_namespace: entry.namespace.temporary_resharding(&entry.uuid),
        });
        record.recipients.push(Participant::new("shard-3"));
        record
    }

    #[test]
    fn test_apply_resharding_is_idempotent() {
        let mut entry = entry();
        let record = record_for(&entry);

        assert!(entry.apply_resharding(&record).unwrap());
        assert_eq!(entry.uuid, record.id());
        assert_eq!(entry.shards, vec!["shard-3".to_string()]);
        assert_eq!(entry.epoch, 2);

        assert!(!entry.apply_resharding(&record).unwrap());
        assert_eq!(entry.epoch, 2);
    }

    #[test]
    fn test_apply_resharding_rejects_stale_source() {
        let mut entry = entry();
        let record = record_for(&entry);
        entry.uuid = Uuid::new_v4();
        assert!(matches!(
            entry.apply_resharding(&record),
            Err(Error::ConflictingOperation(_))
        ));
    }

    #[test]
    fn test_in_memory_catalog_commit() {
        let catalog = InMemoryCatalog::new();
        let entry = entry();
        let ns = entry.namespace.clone();
        let record = record_for(&entry);
        catalog.put_collection(entry);

        catalog.commit_resharding(&record).unwrap();
        let routing = catalog.routing_info(&ns).unwrap();
        assert_eq!(routing.collection.uuid, record.id());
        assert_eq!(routing.key_pattern, record.metadata.key_pattern);

        let missing = Namespace::parse("shop.none").unwrap();
        assert!(matches!(catalog.routing_info(&missing), Err(Error::NotFound(_))));
    }
}
