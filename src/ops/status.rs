//! Inspect and clean up operation records

use crate::common::Result;
use crate::ops::{base_url, check_response};
use crate::reshard::record::OperationRecord;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterStatus {
    pub node_id: String,
    pub role: String,
    pub is_leader: bool,
    pub term: u64,
    pub serving: bool,
    pub active_instances: usize,
    pub live_records: usize,
    pub total_records: usize,
}

pub async fn cluster_status(coordinator_url: &str) -> Result<ClusterStatus> {
    let url = format!("{}/admin/status", base_url(coordinator_url));
    let response = reqwest::get(&url).await?;
    Ok(check_response(response).await?.json().await?)
}

/// Operation summaries, oldest first
pub async fn list_operations(coordinator_url: &str) -> Result<Vec<Value>> {
    #[derive(Deserialize)]
    struct Listing {
        operations: Vec<Value>,
    }

    let url = format!("{}/operations", base_url(coordinator_url));
    let response = reqwest::get(&url).await?;
    let listing: Listing = check_response(response).await?.json().await?;
    Ok(listing.operations)
}

pub async fn show_operation(coordinator_url: &str, operation_id: Uuid) -> Result<OperationRecord> {
    let url = format!("{}/operations/{}", base_url(coordinator_url), operation_id);
    let response = reqwest::get(&url).await?;
    Ok(check_response(response).await?.json().await?)
}

/// Delete a finished operation record
pub async fn forget_operation(coordinator_url: &str, operation_id: Uuid) -> Result<()> {
    let url = format!("{}/operations/{}", base_url(coordinator_url), operation_id);
    let response = reqwest::Client::new().delete(&url).send().await?;
    check_response(response).await?;
    tracing::info!("Forgot operation {}", operation_id);
    Ok(())
}
