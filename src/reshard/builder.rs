//! Turns a validated request into the initial operation record

use crate::common::{Error, Result};
use crate::reshard::catalog::RoutingInfo;
use crate::reshard::record::{OperationMetadata, OperationRecord};
use crate::reshard::request::ValidatedRequest;
use uuid::Uuid;

/// Build the `Initializing` record for a new resharding.
///
/// The working namespace depends only on the source collection, so building
/// twice for the same collection incarnation yields the same namespace.
pub fn build_operation(request: &ValidatedRequest, routing: &RoutingInfo) -> Result<OperationRecord> {
    if routing.collection.namespace != request.namespace {
        return Err(Error::Internal(format!(
            "routing for {} used to build an operation on {}",
            routing.collection.namespace, request.namespace
        )));
    }

    let metadata = OperationMetadata {
        operation_id: Uuid::new_v4(),
        source: routing.collection.clone(),
        key_pattern: request.key_pattern.clone(),
        temp_namespace: request
            .namespace
            .temporary_resharding(&routing.collection.uuid),
    };

    let mut record = OperationRecord::new(metadata);
    record.zones = request.zones.clone();
    record.preset_chunks = request.preset_chunks.clone();
    record.num_initial_chunks = request.num_initial_chunks;
    Ok(record)
}
