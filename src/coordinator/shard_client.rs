//! HTTP client for shard participants

use crate::common::{Error, Result, RetryPolicy};
use crate::reshard::catalog::CatalogClient;
use crate::reshard::participant::{Instruction, ParticipantClient, ParticipantReport};
use crate::reshard::record::ParticipantRole;
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::sync::Arc;
use uuid::Uuid;

/// Reaches shards at the addresses registered in the catalog
pub struct HttpParticipantClient {
    client: Client,
    catalog: Arc<dyn CatalogClient>,
}

impl HttpParticipantClient {
    pub fn new(catalog: Arc<dyn CatalogClient>, retry: &RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(retry.call_timeout())
            .build()?;
        Ok(Self { client, catalog })
    }

    fn base_url(&self, shard_id: &str) -> Result<String> {
        let shard = self
            .catalog
            .list_shards()?
            .into_iter()
            .find(|s| s.id == shard_id)
            .ok_or_else(|| Error::ConnectionFailed(format!("shard {} is not registered", shard_id)))?;

        let address = shard.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            Ok(address.to_string())
        } else {
            Ok(format!("http://{}", address))
        }
    }
}

async fn decode_report(response: Response) -> Result<ParticipantReport> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or(body);
    Err(Error::Remote {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ParticipantClient for HttpParticipantClient {
    async fn send(&self, instruction: &Instruction) -> Result<ParticipantReport> {
        let url = format!("{}/reshard/instruction", self.base_url(&instruction.shard_id)?);
        tracing::debug!(
            "POST {} ({} #{} for {})",
            url,
            instruction.command,
            instruction.sequence,
            instruction.operation_id
        );
        let response = self.client.post(&url).json(instruction).send().await?;
        decode_report(response).await
    }

    async fn status(
        &self,
        shard_id: &str,
        role: ParticipantRole,
        operation_id: Uuid,
    ) -> Result<ParticipantReport> {
        let url = format!(
            "{}/reshard/status/{}/{}",
            self.base_url(shard_id)?,
            operation_id,
            role
        );
        let response = self.client.get(&url).send().await?;
        decode_report(response).await
    }
}
