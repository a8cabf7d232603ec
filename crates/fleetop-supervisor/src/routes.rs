use crate::app::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use fleetop_observe::MetricsExporter;
use fleetop_proto::IncidentStatus;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health/scan", axum::routing::post(scan))
        .route("/incidents", axum::routing::get(list_incidents))
        .route("/incidents/:id", axum::routing::get(get_incident))
        .route("/services/status", axum::routing::get(services_status))
        .route("/explain/:id", axum::routing::post(explain_incident))
        .route("/health", axum::routing::get(health))
        .route("/metrics", axum::routing::get(metrics))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scan_all().await)
}

#[derive(Debug, Deserialize)]
struct IncidentsQuery {
    limit: Option<usize>,
    status: Option<String>,
}

async fn list_incidents(State(state): State<Arc<AppState>>, Query(query): Query<IncidentsQuery>) -> impl IntoResponse {
    let status = query.status.as_deref().and_then(parse_status);
    let limit = query.limit.unwrap_or(50);
    Json(state.store.list(limit, status))
}

fn parse_status(raw: &str) -> Option<IncidentStatus> {
    match raw.to_lowercase().as_str() {
        "detected" => Some(IncidentStatus::Detected),
        "analyzing" => Some(IncidentStatus::Analyzing),
        "action_pending" => Some(IncidentStatus::ActionPending),
        "remediating" => Some(IncidentStatus::Remediating),
        "resolved" => Some(IncidentStatus::Resolved),
        "failed" => Some(IncidentStatus::Failed),
        _ => None,
    }
}

async fn get_incident(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get(&id) {
        Some(incident) => (StatusCode::OK, Json(serde_json::to_value(incident).unwrap())).into_response(),
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "incident not found" }))).into_response(),
    }
}

async fn services_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.last_scan() {
        Some(report) => Json(report.details).into_response(),
        None => (StatusCode::OK, Json(Vec::<fleetop_proto::ServiceScanDetail>::new())).into_response(),
    }
}

async fn explain_incident(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(incident) = state.store.get(&id) else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "incident not found" }))).into_response();
    };

    let summary = format!(
        "Service {} in {} detected {} at {}. Status: {}. Recommendation: {}.",
        incident.service,
        incident.region,
        incident.anomaly_summary,
        incident.detected_at,
        incident.status,
        incident
            .recommendation
            .as_ref()
            .map(|r| r.action.to_string())
            .unwrap_or_else(|| "none".to_string()),
    );

    let explanation = state.reasoner.generate_explanation(&summary).await;
    (StatusCode::OK, Json(serde_json::json!({ "incident_id": id, "explanation": explanation }))).into_response()
}

async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("store", "ready");
    components.insert("scanner", "ready");
    components.insert("reasoner", "ready");
    components.insert("dispatcher", "ready");
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
