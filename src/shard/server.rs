//! Shard participant server

use crate::common::{shutdown_signal, Result, ShardConfig};
use crate::shard::agent::{Pacing, ShardAgent};
use crate::shard::http::{create_router, ShardState};
use std::sync::Arc;

pub struct ShardServer {
    config: ShardConfig,
    shard_id: String,
}

impl ShardServer {
    pub fn new(config: ShardConfig, shard_id: String) -> Self {
        Self { config, shard_id }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting shard participant: {}", self.shard_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!(
            "  Pacing: {} batches of {} documents, lag {}ms in steps of {}ms",
            self.config.clone_batches,
            self.config.docs_per_batch,
            self.config.initial_lag_ms,
            self.config.lag_step_ms
        );

        let agent = Arc::new(ShardAgent::new(
            self.shard_id.clone(),
            Pacing::from(&self.config),
        ));
        let router = create_router(ShardState { agent });

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Shard {} ready", self.shard_id);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Shard {} stopped", self.shard_id);
        Ok(())
    }
}
