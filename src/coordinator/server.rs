//! Coordinator server

use crate::common::{shutdown_signal, CoordinatorConfig, Result};
use crate::coordinator::authority::{start_authority_tasks, Authority};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::shard_client::HttpParticipantClient;
use crate::reshard::catalog::ShardInfo;
use crate::reshard::command::ReshardService;
use crate::reshard::machine::MachineSettings;
use crate::reshard::registry::Registry;
use std::sync::Arc;

pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self { config, node_id }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting coordinator: {}", self.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  DB path: {}", self.config.db_path.display());
        tracing::info!("  Authority at startup: {}", self.config.authority);
        tracing::info!(
            "  Participant retries: {} attempts, {}ms timeout",
            self.config.retry.max_attempts,
            self.config.retry.call_timeout_ms
        );

        let metadata = Arc::new(MetadataStore::open(&self.config.db_path)?);

        for endpoint in &self.config.shards {
            let mut shard = ShardInfo::new(endpoint.id.clone(), endpoint.address.clone());
            shard.zones = endpoint.zones.clone();
            metadata.put_shard(&shard)?;
            tracing::info!("  Shard {} at {}", shard.id, shard.address);
        }

        let participants = HttpParticipantClient::new(metadata.clone(), &self.config.retry)?;
        let registry = Registry::new(
            metadata.clone(),
            metadata.clone(),
            Arc::new(participants),
            MachineSettings::from_config(&self.config),
        );

        let authority = Arc::new(Authority::new(self.node_id.clone()));
        let _authority_handle = start_authority_tasks(&authority, registry.clone());
        if self.config.authority {
            authority.become_leader();
        }

        let state = CoordState {
            service: ReshardService::new(registry.clone(), self.config.test_commands_enabled),
            metadata: metadata.clone(),
            authority: authority.clone(),
        };
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Coordinator ready ({})", authority.role());

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let stopped = registry.step_down().await;
        metadata.flush()?;
        tracing::info!(
            "Coordinator {} stopped ({} operations left to resume)",
            self.node_id,
            stopped
        );
        Ok(())
    }
}
