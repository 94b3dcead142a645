use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use repmine_core::{OracleOutcome, NOT_FOUND_MESSAGE};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

use crate::state::AppState;

fn message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// `GET /{root}/{organization}/{skill}/{participant}`
pub async fn get_proof(
    State(state): State<Arc<AppState>>,
    Path((root, organization, skill, participant)): Path<(String, String, String, String)>,
) -> Response {
    let oracle = state.oracle.clone();
    let result = tokio::task::spawn_blocking(move || {
        oracle.query_raw(&root, &organization, &skill, &participant)
    })
    .await;

    match result {
        Ok(Ok(OracleOutcome::Found(response))) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Ok(OracleOutcome::NotFound(reason))) => {
            debug!(%reason, "Answering proof request with not found");
            message(StatusCode::BAD_REQUEST, NOT_FOUND_MESSAGE)
        }
        Ok(Err(e)) => {
            error!(error = %e, "Proof oracle failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
        Err(e) => {
            error!(error = %e, "Proof task panicked");
            message(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// `GET /health`
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let scheduler = state.scheduler_state();
    let scheduler_json = scheduler
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok())
        .unwrap_or(Value::Null);

    let (status_code, status, head) = match state.store.latest() {
        Ok(head) => {
            let halted = scheduler.as_ref().is_some_and(|s| s.is_halted());
            let status = if halted { "degraded" } else { "healthy" };
            (StatusCode::OK, status, Some(head))
        }
        Err(e) => {
            error!(error = %e, "Health check found store unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "corrupted", None)
        }
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "repmine-node",
            "headVersion": head.as_ref().map(|h| h.version()),
            "headRoot": head.as_ref().map(|h| h.root()),
            "scheduler": scheduler_json,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
