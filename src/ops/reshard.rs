//! Submit a resharding to the coordinator

use crate::common::Result;
use crate::ops::{base_url, check_response};
use crate::reshard::record::ReshardingResult;
use crate::reshard::request::ReshardCollectionRequest;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ReshardReport {
    #[serde(default)]
    pub operation_id: Option<Uuid>,
    #[serde(default)]
    pub attached: bool,
    /// Present when the call waited for the operation to finish
    #[serde(default)]
    pub result: Option<ReshardingResult>,
}

impl ReshardReport {
    pub fn operation_id(&self) -> Option<Uuid> {
        self.result
            .as_ref()
            .map(|r| r.operation_id)
            .or(self.operation_id)
    }
}

/// Run the reshard command; with `wait` the call returns once the operation is done
pub async fn submit_reshard(
    coordinator_url: &str,
    request: &ReshardCollectionRequest,
    wait: bool,
) -> Result<ReshardReport> {
    tracing::info!(
        "Resharding {} on key {}",
        request.namespace,
        serde_json::Value::Object(request.key.clone())
    );

    let url = format!("{}/reshard?wait={}", base_url(coordinator_url), wait);
    let response = reqwest::Client::new().post(&url).json(request).send().await?;
    let report = check_response(response).await?.json().await?;
    Ok(report)
}
