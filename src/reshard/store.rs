//! Durable home of operation records
//!
//! Only point lookup, full replace and full scan are needed by the
//! coordinator. Insertion additionally refuses a second live record for the
//! same source collection.

use crate::common::{Error, Result};
use crate::reshard::record::OperationRecord;
use crate::reshard::types::CollectionIdentity;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

pub trait OperationStore: Send + Sync {
    fn get(&self, operation_id: &Uuid) -> Result<Option<OperationRecord>>;

    /// Persist a new record. Fails with `ConflictingOperation` if another
    /// non-terminal record exists for the same source collection.
    fn insert(&self, record: &OperationRecord) -> Result<()>;

    /// Overwrite an existing record
    fn replace(&self, record: &OperationRecord) -> Result<()>;

    fn scan(&self) -> Result<Vec<OperationRecord>>;

    fn delete(&self, operation_id: &Uuid) -> Result<()>;

    /// Non-terminal record for a collection, if any
    fn find_active(&self, source: &CollectionIdentity) -> Result<Option<OperationRecord>> {
        Ok(self
            .scan()?
            .into_iter()
            .find(|r| !r.is_terminal() && r.source() == source))
    }
}

/// Reject `record` if `existing` holds a live operation on the same collection
pub fn check_insert<'a>(
    record: &OperationRecord,
    existing: impl IntoIterator<Item = &'a OperationRecord>,
) -> Result<()> {
    for other in existing {
        if other.id() == record.id() {
            return Err(Error::ConflictingOperation(format!(
                "operation {} already exists",
                record.id()
            )));
        }
        if !other.is_terminal() && other.source() == record.source() {
            return Err(Error::ConflictingOperation(format!(
                "collection {} already has active operation {}",
                record.source(),
                other.id()
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryOperationStore {
    records: Mutex<BTreeMap<Uuid, OperationRecord>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationStore for InMemoryOperationStore {
    fn get(&self, operation_id: &Uuid) -> Result<Option<OperationRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(operation_id).cloned())
    }

    fn insert(&self, record: &OperationRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        check_insert(record, records.values())?;
        records.insert(record.id(), record.clone());
        Ok(())
    }

    fn replace(&self, record: &OperationRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match records.get_mut(&record.id()) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("operation {}", record.id()))),
        }
    }

    fn scan(&self) -> Result<Vec<OperationRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }

    fn delete(&self, operation_id: &Uuid) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.remove(operation_id);
        Ok(())
    }
}
