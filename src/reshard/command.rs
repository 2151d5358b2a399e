//! The reshard command: validate, build, register, wait

use crate::common::{Error, Result};
use crate::reshard::builder::build_operation;
use crate::reshard::record::ReshardingResult;
use crate::reshard::registry::{InstanceHandle, Registry};
use crate::reshard::request::{validate, ReshardCollectionRequest, ValidationContext};
use tracing::debug;

#[derive(Clone)]
pub struct ReshardService {
    registry: Registry,
    test_commands_enabled: bool,
}

impl ReshardService {
    pub fn new(registry: Registry, test_commands_enabled: bool) -> Self {
        Self {
            registry,
            test_commands_enabled,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Validate the request and create or join the operation for its collection.
    ///
    /// Nothing is persisted unless validation passes.
    pub fn submit(
        &self,
        request: &ReshardCollectionRequest,
        is_metadata_authority: bool,
    ) -> Result<InstanceHandle> {
        let catalog = self.registry.catalog();
        let ctx = ValidationContext {
            is_metadata_authority,
            test_commands_enabled: self.test_commands_enabled,
            collection_zones: catalog.zones_for_collection(&request.namespace)?,
            known_shards: catalog.list_shards()?.into_iter().map(|s| s.id).collect(),
        };
        let validated = validate(request, &ctx)?;

        let routing = catalog.routing_info(&validated.namespace)?;
        let record = build_operation(&validated, &routing)?;
        debug!(
            "Built operation {} for {} with working namespace {}",
            record.id(),
            routing.collection,
            record.metadata.temp_namespace
        );
        self.registry.get_or_create(&routing.collection, record)
    }

    /// Submit and block until the operation is `Done` or `Error`
    pub async fn reshard_collection(
        &self,
        request: &ReshardCollectionRequest,
        is_metadata_authority: bool,
    ) -> Result<ReshardingResult> {
        let handle = self.submit(request, is_metadata_authority)?;
        handle.await_completion().await.map_err(Error::from)
    }
}
