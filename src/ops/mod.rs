//! Ops commands against a running coordinator

pub mod catalog;
pub mod reshard;
pub mod status;

pub use catalog::{list_shards, register_collection, register_shard, show_collection};
pub use reshard::{submit_reshard, ReshardReport};
pub use status::{
    cluster_status, forget_operation, list_operations, show_operation, ClusterStatus,
};

use crate::common::{Error, Result};
use reqwest::Response;

/// Turn a non-2xx coordinator answer into [`Error::Remote`]
pub(crate) async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            let code = v["error"]["code"].as_str()?.to_string();
            let message = v["error"]["message"].as_str()?.to_string();
            Some(format!("[{}] {}", code, message))
        })
        .unwrap_or(body);
    Err(Error::Remote {
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn base_url(coordinator_url: &str) -> &str {
    coordinator_url.trim_end_matches('/')
}
