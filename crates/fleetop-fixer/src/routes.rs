use crate::app::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use base64::Engine;
use fleetop_observe::MetricsExporter;
use fleetop_proto::ActionEnvelope;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/actions/execute", axum::routing::post(execute_push))
        .route("/actions/execute/manual", axum::routing::post(execute_manual))
        .route("/health", axum::routing::get(health))
        .route("/metrics", axum::routing::get(metrics))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// A push-subscription delivery envelope: the outer wrapper the bus POSTs,
/// carrying the base64-encoded, JSON-serialized `ActionEnvelope` as `data`.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
    #[serde(default)]
    #[allow(dead_code)]
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
    #[serde(default)]
    #[allow(dead_code)]
    message_id: Option<String>,
    data: String,
    #[serde(default)]
    #[allow(dead_code)]
    attributes: HashMap<String, String>,
}

/// Bus push endpoint. Always returns 200 — per the poison-message handling
/// contract, a deserialization or processing failure is logged and (where
/// possible) recorded on the incident, never surfaced as a non-2xx that
/// would trigger bus redelivery storms.
async fn execute_push(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    let push: PushEnvelope = match serde_json::from_str(&body) {
        Ok(push) => push,
        Err(e) => {
            warn!(error = %e, "malformed push envelope; acknowledging as poison message");
            return (StatusCode::OK, Json(serde_json::json!({ "acknowledged": true, "processed": false }))).into_response();
        }
    };

    let decoded = match base64::engine::general_purpose::STANDARD.decode(push.message.data) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "malformed base64 payload; acknowledging as poison message");
            return (StatusCode::OK, Json(serde_json::json!({ "acknowledged": true, "processed": false }))).into_response();
        }
    };

    let envelope: ActionEnvelope = match serde_json::from_slice(&decoded) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed action envelope; acknowledging as poison message");
            return (StatusCode::OK, Json(serde_json::json!({ "acknowledged": true, "processed": false }))).into_response();
        }
    };

    let result = state.process_envelope(&envelope).await;
    (StatusCode::OK, Json(serde_json::json!({ "acknowledged": true, "processed": true, "result": result }))).into_response()
}

/// Same handling as the push endpoint, minus the base64/push wrapper, for
/// operators to trigger a known action directly.
async fn execute_manual(State(state): State<Arc<AppState>>, Json(envelope): Json<ActionEnvelope>) -> impl IntoResponse {
    let result = state.process_envelope(&envelope).await;
    let status = if result.success { StatusCode::OK } else { StatusCode::UNPROCESSABLE_ENTITY };
    (status, Json(result)).into_response()
}

async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("store", "ready");
    components.insert("executor", "ready");
    Json(serde_json::json!({ "status": "ok", "components": components }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = MetricsExporter::new(&state.metrics).render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}
