//! Register collections and shards with the coordinator

use crate::common::{encode_segment, Result};
use crate::ops::{base_url, check_response};
use crate::reshard::catalog::{CollectionEntry, ShardInfo};
use crate::reshard::types::{Namespace, ShardId, ZoneRange};
use serde_json::{json, Map, Value};

/// Shard a collection on `key` across `shards`
pub async fn register_collection(
    coordinator_url: &str,
    namespace: &Namespace,
    key: Map<String, Value>,
    shards: Vec<ShardId>,
    zones: Vec<ZoneRange>,
) -> Result<CollectionEntry> {
    let url = format!("{}/collections", base_url(coordinator_url));
    let body = json!({
        "namespace": namespace,
        "key": key,
        "shards": shards,
        "zones": zones,
    });
    let response = reqwest::Client::new().put(&url).json(&body).send().await?;
    Ok(check_response(response).await?.json().await?)
}

/// Current routing entry of a collection
pub async fn show_collection(coordinator_url: &str, namespace: &Namespace) -> Result<CollectionEntry> {
    let url = format!(
        "{}/collections/{}",
        base_url(coordinator_url),
        encode_segment(&namespace.to_string())
    );
    let response = reqwest::get(&url).await?;
    Ok(check_response(response).await?.json().await?)
}

pub async fn register_shard(coordinator_url: &str, shard: &ShardInfo) -> Result<ShardInfo> {
    let url = format!("{}/shards", base_url(coordinator_url));
    let response = reqwest::Client::new().put(&url).json(shard).send().await?;
    Ok(check_response(response).await?.json().await?)
}

pub async fn list_shards(coordinator_url: &str) -> Result<Vec<ShardInfo>> {
    #[derive(serde::Deserialize)]
    struct Listing {
        shards: Vec<ShardInfo>,
    }

    let url = format!("{}/shards", base_url(coordinator_url));
    let response = reqwest::get(&url).await?;
    let listing: Listing = check_response(response).await?.json().await?;
    Ok(listing.shards)
}
