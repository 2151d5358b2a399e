//! HTTP API for the coordinator
//!
//! - `POST /reshard` runs the reshard command (blocks unless `?wait=false`)
//! - `/operations` lists, inspects and forgets operation records
//! - `/collections` and `/shards` maintain the routing catalog
//! - `/admin/step-down`, `/admin/step-up` move the metadata authority
//! - `/health`, `/admin/status`, `/metrics` for observability

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result, METRICS};
use crate::coordinator::authority::Authority;
use crate::coordinator::metadata::MetadataStore;
use crate::reshard::catalog::{CatalogClient, CollectionEntry, ShardInfo};
use crate::reshard::command::ReshardService;
use crate::reshard::record::OperationRecord;
use crate::reshard::request::ReshardCollectionRequest;
use crate::reshard::store::OperationStore;
use crate::reshard::types::{KeyPattern, Namespace, ShardId, ZoneRange};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct CoordState {
    pub service: ReshardService,
    pub metadata: Arc<MetadataStore>,
    pub authority: Arc<Authority>,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/reshard", post(reshard_collection))
        .route("/operations", get(list_operations))
        .route(
            "/operations/:operation_id",
            get(get_operation).delete(forget_operation),
        )
        .route("/collections", put(register_collection).get(list_collections))
        .route("/collections/:namespace", get(get_collection))
        .route("/shards", put(register_shard).get(list_shards))
        .route("/admin/step-down", post(admin_step_down))
        .route("/admin/step-up", post(admin_step_up))
        .route("/admin/status", get(admin_status))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route_layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ReshardQuery {
    #[serde(default = "default_wait")]
    wait: bool,
}

fn default_wait() -> bool {
    true
}

/// The reshard command.
///
/// With `wait=false` the call returns as soon as the operation is registered.
async fn reshard_collection(
    State(state): State<CoordState>,
    Query(query): Query<ReshardQuery>,
    Json(request): Json<ReshardCollectionRequest>,
) -> Result<impl IntoResponse> {
    let handle = state
        .service
        .submit(&request, state.authority.is_leader())?;

    if !query.wait {
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "operation_id": handle.operation_id,
                "collection_uuid": handle.source.uuid,
                "attached": handle.attached,
            })),
        ));
    }

    let result = handle.await_completion().await.map_err(Error::from)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "ok": 1,
            "attached": handle.attached,
            "result": result,
        })),
    ))
}

fn summarize(record: &OperationRecord) -> Value {
    json!({
        "operation_id": record.id(),
        "namespace": record.namespace(),
        "collection_uuid": record.source().uuid,
        "key": record.metadata.key_pattern,
        "phase": record.phase,
        "donors": record.donors.iter().map(|p| &p.shard_id).collect::<Vec<_>>(),
        "recipients": record.recipients.iter().map(|p| &p.shard_id).collect::<Vec<_>>(),
        "failure": record.failure,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

async fn list_operations(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    let mut records = state.metadata.scan()?;
    records.sort_by_key(|r| r.created_at);
    let operations: Vec<Value> = records.iter().map(summarize).collect();
    Ok(Json(json!({ "operations": operations })))
}

async fn get_operation(
    State(state): State<CoordState>,
    Path(operation_id): Path<Uuid>,
) -> Result<Json<OperationRecord>> {
    state
        .metadata
        .get(&operation_id)?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("operation {}", operation_id)))
}

/// Delete a finished operation record. Live records cannot be forgotten.
async fn forget_operation(
    State(state): State<CoordState>,
    Path(operation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let record = state
        .metadata
        .get(&operation_id)?
        .ok_or_else(|| Error::NotFound(format!("operation {}", operation_id)))?;
    if !record.is_terminal() {
        return Err(Error::ConflictingOperation(format!(
            "operation {} is still in phase {}",
            operation_id, record.phase
        )));
    }
    state.metadata.delete(&operation_id)?;
    tracing::info!("Forgot operation {} ({})", operation_id, record.phase);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CollectionRegistration {
    namespace: Namespace,
    key: Map<String, Value>,
    shards: Vec<ShardId>,
    #[serde(default)]
    zones: Vec<ZoneRange>,
}

/// Shard a collection, or replace its routing while no operation runs on it
async fn register_collection(
    State(state): State<CoordState>,
    Json(req): Json<CollectionRegistration>,
) -> Result<impl IntoResponse> {
    let key_pattern = KeyPattern::try_from(req.key).map_err(Error::InvalidRequest)?;
    if req.shards.is_empty() {
        return Err(Error::InvalidRequest(
            "a collection needs at least one owning shard".into(),
        ));
    }
    for zone in &req.zones {
        key_pattern
            .check_bound(&zone.min)
            .and_then(|()| key_pattern.check_bound(&zone.max))
            .map_err(Error::InvalidRequest)?;
    }

    if let Some(existing) = state.metadata.get_collection(&req.namespace)? {
        if let Some(active) = state.metadata.find_active(&existing.identity())? {
            return Err(Error::ConflictingOperation(format!(
                "collection {} is being resharded by operation {}",
                req.namespace,
                active.id()
            )));
        }
    }

    let mut entry = CollectionEntry::new(req.namespace, key_pattern, req.shards);
    entry.zones = req.zones;
    state.metadata.put_collection(&entry)?;
    tracing::info!(
        "Registered collection {} ({}) on {:?}",
        entry.namespace,
        entry.uuid,
        entry.shards
    );
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_collections(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    Ok(Json(json!({ "collections": state.metadata.list_collections()? })))
}

async fn get_collection(
    State(state): State<CoordState>,
    Path(namespace): Path<String>,
) -> Result<Json<CollectionEntry>> {
    let namespace = Namespace::parse(&namespace)?;
    state
        .metadata
        .get_collection(&namespace)?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("collection {}", namespace)))
}

async fn register_shard(
    State(state): State<CoordState>,
    Json(shard): Json<ShardInfo>,
) -> Result<impl IntoResponse> {
    if shard.id.is_empty() || shard.address.is_empty() {
        return Err(Error::InvalidRequest(
            "shard id and address are required".into(),
        ));
    }
    state.metadata.put_shard(&shard)?;
    tracing::info!(
        "Registered shard {} at {} ({})",
        shard.id,
        shard.address,
        shard.state
    );
    Ok(Json(shard))
}

async fn list_shards(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    Ok(Json(json!({ "shards": state.metadata.list_shards()? })))
}

async fn admin_step_down(State(state): State<CoordState>) -> impl IntoResponse {
    state.authority.step_down();
    Json(json!({ "role": state.authority.role().to_string(), "term": state.authority.term() }))
}

async fn admin_step_up(State(state): State<CoordState>) -> impl IntoResponse {
    let term = state.authority.become_leader();
    Json(json!({ "role": state.authority.role().to_string(), "term": term }))
}

/// Minimal status for dashboards
async fn admin_status(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    let registry = state.service.registry();
    let records = state.metadata.scan()?;
    let live = records.iter().filter(|r| !r.is_terminal()).count();
    Ok(Json(json!({
        "node_id": state.authority.node_id(),
        "role": state.authority.role().to_string(),
        "is_leader": state.authority.is_leader(),
        "term": state.authority.term(),
        "serving": registry.is_serving(),
        "active_instances": registry.active_count(),
        "live_records": live,
        "total_records": records.len(),
        "uptime_seconds": METRICS.uptime_seconds(),
    })))
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "role": state.authority.role().to_string(),
        "is_leader": state.authority.is_leader(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus exposition
async fn metrics(State(state): State<CoordState>) -> impl IntoResponse {
    let mut out = String::new();
    out += &format!(
        "minireshard_is_leader {}\n",
        u8::from(state.authority.is_leader())
    );
    out += &format!("minireshard_authority_term {}\n", state.authority.term());
    out += &METRICS.to_prometheus();
    (StatusCode::OK, out)
}
