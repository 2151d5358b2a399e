//! Metadata store using RocksDB
//!
//! Stores:
//! - Operation records (operation id → record)
//! - Collection routing (namespace → uuid, shard key, owning shards, zones)
//! - Shard registry (shard id → address, state, zones)
//!
//! Values are JSON so bounds and key patterns keep their field order.

use crate::common::{Error, Result};
use crate::reshard::catalog::{CatalogClient, CollectionEntry, RoutingInfo, ShardInfo};
use crate::reshard::record::OperationRecord;
use crate::reshard::store::{check_insert, OperationStore};
use crate::reshard::types::{Namespace, ZoneRange};
use rocksdb::{ColumnFamily, IteratorMode, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

const CF_OPERATIONS: &str = "operations";
const CF_COLLECTIONS: &str = "collections";
const CF_SHARDS: &str = "shards";

/// Metadata store
pub struct MetadataStore {
    db: DB,
    /// Serializes read-check-write sequences
    write_lock: Mutex<()>,
}

impl MetadataStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_OPERATIONS, CF_COLLECTIONS, CF_SHARDS])?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::MetadataCorrupted(format!("missing column family {}", name)))
    }

    fn put_json<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::MetadataCorrupted(e.to_string())),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let iter = self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start);

        let mut values = Vec::new();
        for item in iter {
            let (_, bytes) = item?;
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| Error::MetadataCorrupted(e.to_string()))?;
            values.push(value);
        }
        Ok(values)
    }

    // === Collection operations ===

    /// Register or replace a collection's routing entry
    pub fn put_collection(&self, entry: &CollectionEntry) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.put_json(
            CF_COLLECTIONS,
            entry.namespace.to_string().as_bytes(),
            entry,
        )
    }

    pub fn get_collection(&self, namespace: &Namespace) -> Result<Option<CollectionEntry>> {
        self.get_json(CF_COLLECTIONS, namespace.to_string().as_bytes())
    }

    pub fn list_collections(&self) -> Result<Vec<CollectionEntry>> {
        self.scan_json(CF_COLLECTIONS)
    }

    fn require_collection(&self, namespace: &Namespace) -> Result<CollectionEntry> {
        self.get_collection(namespace)?
            .ok_or_else(|| Error::NotFound(format!("collection {}", namespace)))
    }

    // === Shard operations ===

    /// Register or update a shard
    pub fn put_shard(&self, shard: &ShardInfo) -> Result<()> {
        self.put_json(CF_SHARDS, shard.id.as_bytes(), shard)
    }

    pub fn get_shard(&self, shard_id: &str) -> Result<Option<ShardInfo>> {
        self.get_json(CF_SHARDS, shard_id.as_bytes())
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl OperationStore for MetadataStore {
    fn get(&self, operation_id: &Uuid) -> Result<Option<OperationRecord>> {
        self.get_json(CF_OPERATIONS, operation_id.as_bytes())
    }

    fn insert(&self, record: &OperationRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let existing: Vec<OperationRecord> = self.scan_json(CF_OPERATIONS)?;
        check_insert(record, &existing)?;
        self.put_json(CF_OPERATIONS, record.id().as_bytes(), record)
    }

    fn replace(&self, record: &OperationRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.db.get_cf(self.cf(CF_OPERATIONS)?, record.id().as_bytes())?.is_none() {
            return Err(Error::NotFound(format!("operation {}", record.id())));
        }
        self.put_json(CF_OPERATIONS, record.id().as_bytes(), record)
    }

    fn scan(&self) -> Result<Vec<OperationRecord>> {
        self.scan_json(CF_OPERATIONS)
    }

    fn delete(&self, operation_id: &Uuid) -> Result<()> {
        self.db
            .delete_cf(self.cf(CF_OPERATIONS)?, operation_id.as_bytes())?;
        Ok(())
    }
}

impl CatalogClient for MetadataStore {
    fn routing_info(&self, namespace: &Namespace) -> Result<RoutingInfo> {
        Ok(self.require_collection(namespace)?.routing_info())
    }

    fn zones_for_collection(&self, namespace: &Namespace) -> Result<Vec<ZoneRange>> {
        Ok(self.require_collection(namespace)?.zones)
    }

    fn list_shards(&self) -> Result<Vec<ShardInfo>> {
        self.scan_json(CF_SHARDS)
    }

    fn commit_resharding(&self, record: &OperationRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entry = self.require_collection(record.namespace())?;
        if entry.apply_resharding(record)? {
            self.put_json(
                CF_COLLECTIONS,
                entry.namespace.to_string().as_bytes(),
                &entry,
            )?;
            self.db.flush_cf(self.cf(CF_COLLECTIONS)?)?;
            tracing::info!(
                "Routing for {} now at uuid {} on {:?} (epoch {})",
                entry.namespace,
                entry.uuid,
                entry.shards,
                entry.epoch
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{NodeState, OperationFailure};
    use crate::reshard::record::{OperationMetadata, Participant, Phase};
    use serde_json::json;
    use tempfile::tempdir;

    fn collection() -> CollectionEntry {
        CollectionEntry::new(
            Namespace::parse("shop.orders").unwrap(),
            serde_json::from_value(json!({"_id": 1})).unwrap(),
            vec!["shard-1".into(), "shard-2".into()],
        )
    }

    fn record_for(entry: &CollectionEntry) -> OperationRecord {
        OperationRecord::new(OperationMetadata {
            operation_id: Uuid::new_v4(),
            source: entry.identity(),
            key_pattern: serde_json::from_value(json!({"region": 1, "id": "hashed"})).unwrap(),
            temp_namespace: entry.namespace.temporary_resharding(&entry.uuid),
        })
    }

    #[test]
    fn test_operation_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.db");
        let entry = collection();
        let mut record = record_for(&entry);

        {
            let store = MetadataStore::open(&path).unwrap();
            store.insert(&record).unwrap();
            record.donors.push(Participant::new("shard-1"));
            record.recipients.push(Participant::new("shard-3"));
            record.advance();
            store.replace(&record).unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        let loaded = store.get(&record.id()).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.phase, Phase::PreparingToDonate);
        assert_eq!(store.scan().unwrap().len(), 1);
    }

    #[test]
    fn test_one_live_record_per_collection() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("meta.db")).unwrap();
        let entry = collection();

        let mut first = record_for(&entry);
        store.insert(&first).unwrap();
        assert!(matches!(
            store.insert(&record_for(&entry)),
            Err(Error::ConflictingOperation(_))
        ));

        first.fail(OperationFailure::participant("shard-1", "gone"));
        store.replace(&first).unwrap();
        store.insert(&record_for(&entry)).unwrap();
        assert_eq!(store.scan().unwrap().len(), 2);

        store.delete(&first.id()).unwrap();
        assert!(store.get(&first.id()).unwrap().is_none());
    }

    #[test]
    fn test_catalog_commit_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("meta.db")).unwrap();
        let entry = collection();
        store.put_collection(&entry).unwrap();
        store
            .put_shard(&ShardInfo {
                id: "shard-3".into(),
                address: "http://localhost:7003".into(),
                state: NodeState::Alive,
                zones: vec!["east".into()],
            })
            .unwrap();

        let mut record = record_for(&entry);
        record.recipients.push(Participant::new("shard-3"));

        store.commit_resharding(&record).unwrap();
        store.commit_resharding(&record).unwrap();

        let routing = store.routing_info(&entry.namespace).unwrap();
        assert_eq!(routing.collection.uuid, record.id());
        assert_eq!(routing.shards, vec!["shard-3".to_string()]);
        assert_eq!(
            routing.key_pattern.to_string(),
            r#"{"region":1,"id":"hashed"}"#
        );
        assert_eq!(store.get_collection(&entry.namespace).unwrap().unwrap().epoch, 2);
        assert_eq!(store.list_shards().unwrap().len(), 1);
        assert_eq!(store.get_shard("shard-3").unwrap().unwrap().zones, vec!["east"]);
    }

    #[test]
    fn test_missing_collection() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("meta.db")).unwrap();
        let ns = Namespace::parse("shop.none").unwrap();
        assert!(matches!(store.routing_info(&ns), Err(Error::NotFound(_))));
        assert!(store.list_collections().unwrap().is_empty());
    }
}
