//! End-to-end scenarios exercising the scan → reason → persist → publish →
//! apply chain against in-memory fakes for every external dependency.
//! Mirrors the seed suite: healthy, degraded-by-latency, unhealthy-by-both,
//! insufficient-data, reasoner-parse-failure, scaling-clamp, and
//! rollback-to-missing-revision.

use async_trait::async_trait;
use fleetop_dispatcher::{BusTransport, Dispatcher};
use fleetop_executor::{Executor, InMemoryControlPlane, ScalingState};
use fleetop_proto::{ActionEnvelope, ActionType, IncidentStatus, ScaleParams};
use fleetop_reasoner::{GenerativeModel, PlatformFacts, Reasoner};
use fleetop_scanner::{FakeTelemetry, HealthScanner, ScanThresholds};
use fleetop_store::IncidentStore;
use parking_lot::Mutex;
use std::collections::HashMap;

struct FixedModel(String);

#[async_trait]
impl GenerativeModel for FixedModel {
    async fn generate(&self, _prompt: &str, _max_tokens: u32, _temperature: f64) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct RecordingBus {
    published: Mutex<Vec<(Vec<u8>, HashMap<String, String>)>>,
}

#[async_trait]
impl BusTransport for RecordingBus {
    async fn publish_once(&self, payload: &[u8], attributes: &HashMap<String, String>) -> anyhow::Result<String> {
        self.published.lock().push((payload.to_vec(), attributes.clone()));
        Ok(format!("msg-{}", self.published.lock().len()))
    }
}

fn thresholds() -> ScanThresholds {
    ScanThresholds {
        error_threshold: 5.0,
        latency_p95_threshold_ms: 600.0,
        min_request_count: 100,
        scan_window_minutes: 5,
    }
}

fn target() -> fleetop_proto::ServiceTarget {
    fleetop_proto::ServiceTarget::new("demo-app-a", "us-central1")
}

fn executor_bounds() -> fleetop_config::ExecutorBounds {
    fleetop_config::ExecutorBounds {
        min_instances_floor: 0,
        min_instances_ceiling: 5,
        max_instances_floor: 10,
        max_instances_ceiling: 100,
    }
}

#[tokio::test]
async fn scenario_1_healthy_service_produces_no_incident() {
    let backend = FakeTelemetry {
        request_count: 1000,
        error_count: 2,
        p95_latency_ms: Some(200.0),
        ..Default::default()
    };
    let scanner = HealthScanner::new(backend, thresholds());
    let health = scanner.scan(&target()).await;

    assert!(!health.has_anomaly);
    assert_eq!(health.status, fleetop_proto::ServiceStatus::Healthy);
}

#[tokio::test]
async fn scenario_2_degraded_by_latency_alone() {
    let backend = FakeTelemetry {
        request_count: 1000,
        error_count: 2,
        p95_latency_ms: Some(900.0),
        ..Default::default()
    };
    let scanner = HealthScanner::new(backend, thresholds());
    let health = scanner.scan(&target()).await;

    assert!(health.has_anomaly);
    assert_eq!(health.status, fleetop_proto::ServiceStatus::Degraded);
}

#[tokio::test]
async fn scenario_3_unhealthy_flows_through_to_resolved_incident() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = IncidentStore::new(dir.path(), "incidents", "actions");

    let backend = FakeTelemetry {
        request_count: 1000,
        error_count: 150,
        p95_latency_ms: Some(1200.0),
        ..Default::default()
    };
    let scanner = HealthScanner::new(backend, thresholds());
    let health = scanner.scan(&target()).await;
    assert_eq!(health.status, fleetop_proto::ServiceStatus::Unhealthy);

    let model = FixedModel(
        r#"{"action": "ROLLBACK", "confidence": 0.9, "reasoning": "regression after deploy", "risk_assessment": "brief blip", "expected_impact": "error rate drops"}"#
            .to_string(),
    );
    let mut traffic_split = HashMap::new();
    traffic_split.insert("demo-app-a-00002-xyz".to_string(), 100);
    let facts = PlatformFacts {
        current_revision: Some("demo-app-a-00003-abc".to_string()),
        traffic_split,
        available_revisions: vec![
            "demo-app-a-00003-abc".to_string(),
            "demo-app-a-00002-xyz".to_string(),
        ],
    };
    let reasoner = Reasoner::new(model);
    let recommendation = reasoner.recommend(&health, &facts).await;
    assert_eq!(recommendation.action, ActionType::Rollback);
    assert_eq!(recommendation.target_revision.as_deref(), Some("demo-app-a-00002-xyz"));

    let incident = store.create_incident(
        &health.service,
        &health.region,
        health.metrics,
        health.log_samples.clone(),
        health.anomaly_summary.clone().unwrap_or_default(),
        Some(recommendation.clone()),
    );

    let envelope = ActionEnvelope {
        incident_id: incident.id.clone(),
        service: health.service.clone(),
        region: health.region.clone(),
        action: recommendation.action,
        target_revision: recommendation.target_revision.clone(),
        scale_params: recommendation.scale_params,
        reason: recommendation.reasoning.clone(),
        confidence: recommendation.confidence,
        created_at: chrono::Utc::now(),
    };

    let bus = RecordingBus::default();
    let dispatcher = Dispatcher::new(bus);
    dispatcher.publish(&envelope).await.expect("publish succeeds");
    store
        .transition(&incident.id, IncidentStatus::ActionPending, |_| {})
        .unwrap();

    let mut traffic = HashMap::new();
    traffic.insert("demo-app-a-00003-abc".to_string(), 100);
    let control_plane = InMemoryControlPlane::new(
        vec!["demo-app-a-00003-abc".to_string(), "demo-app-a-00002-xyz".to_string()],
        traffic,
        ScalingState {
            min_instances: 1,
            max_instances: 20,
        },
    );
    let executor = Executor::new(control_plane, executor_bounds(), false);

    store
        .transition(&incident.id, IncidentStatus::Remediating, |inc| {
            inc.remediation_started_at = Some(chrono::Utc::now());
        })
        .unwrap();
    let result = executor.execute(&envelope).await;
    assert!(result.success);

    let resolved = store
        .transition(&incident.id, IncidentStatus::Resolved, |inc| {
            inc.resolved_at = Some(chrono::Utc::now());
            inc.mttr_seconds = Some(1);
            inc.action_result = Some(result);
        })
        .unwrap();

    assert_eq!(resolved.status, IncidentStatus::Resolved);
    assert!(resolved.mttr_seconds.is_some());
}

#[tokio::test]
async fn scenario_4_insufficient_data_is_healthy_regardless_of_rate() {
    let backend = FakeTelemetry {
        request_count: 10,
        error_count: 9,
        p95_latency_ms: Some(5000.0),
        ..Default::default()
    };
    let scanner = HealthScanner::new(backend, thresholds());
    let health = scanner.scan(&target()).await;

    assert_eq!(health.status, fleetop_proto::ServiceStatus::Healthy);
    assert!(!health.has_anomaly);
}

#[tokio::test]
async fn scenario_5_reasoner_parse_failure_yields_no_action_dispatched() {
    let health = fleetop_proto::ServiceHealth {
        service: "demo-app-a".to_string(),
        region: "us-central1".to_string(),
        status: fleetop_proto::ServiceStatus::Unhealthy,
        metrics: fleetop_proto::HealthMetrics::new(1000, 150, Some(1200.0)),
        log_samples: vec![],
        has_anomaly: true,
        anomaly_summary: Some("high error rate; high latency".to_string()),
    };

    let model = FixedModel("the model said something that is not JSON".to_string());
    let reasoner = Reasoner::new(model);
    let recommendation = reasoner.recommend(&health, &PlatformFacts::default()).await;

    // A NONE recommendation is never turned into an envelope by the
    // Supervisor loop — there is nothing downstream for the dispatcher or
    // executor to act on.
    assert_eq!(recommendation.action, ActionType::None);
    assert_eq!(recommendation.confidence, 0.0);
}

#[tokio::test]
async fn scenario_6_scaling_action_is_clamped_to_configured_bounds() {
    let mut traffic = HashMap::new();
    traffic.insert("demo-app-a-00003-abc".to_string(), 100);
    let control_plane = InMemoryControlPlane::new(
        vec!["demo-app-a-00003-abc".to_string()],
        traffic,
        ScalingState {
            min_instances: 1,
            max_instances: 20,
        },
    );
    let executor = Executor::new(control_plane, executor_bounds(), false);

    let envelope = ActionEnvelope {
        incident_id: "inc_demo-app-a_1".to_string(),
        service: "demo-app-a".to_string(),
        region: "us-central1".to_string(),
        action: ActionType::ScaleUp,
        target_revision: None,
        scale_params: Some(ScaleParams {
            min_instances: Some(999),
            max_instances: Some(1),
        }),
        reason: "sustained high load".to_string(),
        confidence: 0.8,
        created_at: chrono::Utc::now(),
    };

    let result = executor.execute(&envelope).await;
    assert!(result.success);
    assert_eq!(result.new_min_instances, Some(5));
    assert_eq!(result.new_max_instances, Some(10));
}

#[tokio::test]
async fn scenario_7_rollback_to_missing_revision_fails_the_incident() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = IncidentStore::new(dir.path(), "incidents", "actions");

    let incident = store.create_incident(
        "demo-app-a",
        "us-central1",
        fleetop_proto::HealthMetrics::new(1000, 150, Some(1200.0)),
        vec![],
        "high error rate".to_string(),
        None,
    );
    store
        .transition(&incident.id, IncidentStatus::ActionPending, |_| {})
        .unwrap();
    store
        .transition(&incident.id, IncidentStatus::Remediating, |_| {})
        .unwrap();

    let mut traffic = HashMap::new();
    traffic.insert("demo-app-a-00003-abc".to_string(), 100);
    let control_plane = InMemoryControlPlane::new(
        vec!["demo-app-a-00003-abc".to_string()],
        traffic,
        ScalingState {
            min_instances: 1,
            max_instances: 20,
        },
    );
    let executor = Executor::new(control_plane, executor_bounds(), false);

    let envelope = ActionEnvelope {
        incident_id: incident.id.clone(),
        service: "demo-app-a".to_string(),
        region: "us-central1".to_string(),
        action: ActionType::Rollback,
        target_revision: Some("demo-app-a-99999-ghost".to_string()),
        scale_params: None,
        reason: "regression".to_string(),
        confidence: 0.9,
        created_at: chrono::Utc::now(),
    };

    let result = executor.execute(&envelope).await;
    assert!(!result.success);
    assert!(result.error_message.as_ref().unwrap().contains("not found"));

    let failed = store
        .transition(&incident.id, IncidentStatus::Failed, |inc| {
            inc.resolved_at = Some(chrono::Utc::now());
            inc.action_result = Some(result);
        })
        .unwrap();
    assert_eq!(failed.status, IncidentStatus::Failed);
}
