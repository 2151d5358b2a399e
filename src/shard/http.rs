//! HTTP endpoints a shard exposes to the coordinator

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::reshard::participant::{Instruction, ParticipantReport};
use crate::reshard::record::ParticipantRole;
use crate::shard::agent::ShardAgent;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct ShardState {
    pub agent: Arc<ShardAgent>,
}

pub fn create_router(state: ShardState) -> Router {
    Router::new()
        .route("/reshard/instruction", post(handle_instruction))
        .route("/reshard/status/:operation_id/:role", get(participant_status))
        .route("/health", get(health))
        .route_layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

async fn handle_instruction(
    State(state): State<ShardState>,
    Json(instruction): Json<Instruction>,
) -> crate::Result<Json<ParticipantReport>> {
    state.agent.handle(&instruction).map(Json)
}

async fn participant_status(
    State(state): State<ShardState>,
    Path((operation_id, role)): Path<(Uuid, String)>,
) -> crate::Result<Json<ParticipantReport>> {
    let role: ParticipantRole = role.parse()?;
    state.agent.status(role, operation_id).map(Json)
}

async fn health(State(state): State<ShardState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "shard_id": state.agent.shard_id(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshard::participant::Command;
    use crate::reshard::record::ParticipantStatus;
    use crate::reshard::types::Namespace;
    use crate::shard::agent::Pacing;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        create_router(ShardState {
            agent: Arc::new(ShardAgent::new("shard-1", Pacing::default())),
        })
    }

    #[tokio::test]
    async fn test_instruction_roundtrip() {
        let namespace = Namespace::parse("shop.orders").unwrap();
        let instruction = Instruction {
            operation_id: Uuid::new_v4(),
            temp_namespace: namespace.temporary_resharding(&Uuid::new_v4()),
            namespace,
            shard_id: "shard-1".into(),
            role: ParticipantRole::Donor,
            sequence: 1,
            command: Command::Prepare,
        };

        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/reshard/instruction")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&instruction).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let report: ParticipantReport = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(report.status, ParticipantStatus::Prepared);
        assert_eq!(report.sequence, 1);
    }

    #[tokio::test]
    async fn test_bad_role_is_rejected() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri(format!("/reshard/status/{}/observer", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
