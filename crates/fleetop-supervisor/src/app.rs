use crate::model::HttpGenerativeModel;
use crate::revision::RevisionInfoClient;
use crate::telemetry::HttpTelemetryBackend;
use fleetop_config::FleetConfig;
use fleetop_dispatcher::Dispatcher;
use fleetop_observe::{OperationKind, OperationOutcome};
use fleetop_proto::{ActionEnvelope, ActionType, IncidentStatus, ScanReport, ServiceScanDetail};
use fleetop_reasoner::Reasoner;
use fleetop_scanner::{HealthScanner, ScanThresholds};
use fleetop_store::IncidentStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct AppState {
    pub config: FleetConfig,
    pub scanner: HealthScanner<HttpTelemetryBackend>,
    pub reasoner: Reasoner<HttpGenerativeModel>,
    pub revision_client: RevisionInfoClient,
    pub dispatcher: Dispatcher<crate::bus::HttpBusTransport>,
    pub store: Arc<IncidentStore>,
    pub metrics: Arc<fleetop_observe::OperationsMetrics>,
    pub audit: Arc<fleetop_observe::AuditLogger>,
    last_scan: RwLock<Option<ScanReport>>,
}

impl AppState {
    pub fn new(config: FleetConfig) -> Self {
        let thresholds = ScanThresholds {
            error_threshold: config.error_threshold,
            latency_p95_threshold_ms: config.latency_p95_threshold_ms,
            min_request_count: config.min_request_count,
            scan_window_minutes: config.scan_window_minutes,
        };
        let telemetry = HttpTelemetryBackend::new(
            config.telemetry_api_base_url.clone(),
            config.telemetry_api_key.clone(),
            config.project_id.clone(),
        );
        let model = HttpGenerativeModel::new(config.model_api_base_url.clone(), config.model_api_key.clone());
        let revision_client = RevisionInfoClient::new(
            config.control_plane_api_base_url.clone(),
            config.control_plane_api_key.clone(),
            config.project_id.clone(),
        );
        let bus = crate::bus::HttpBusTransport::new(
            config.bus_api_base_url.clone(),
            config.control_plane_api_key.clone(),
            config.project_id.clone(),
            config.pubsub_topic.clone(),
        );

        let state_dir = std::path::PathBuf::from(&config.state_dir);
        let store = Arc::new(IncidentStore::new(
            &state_dir,
            &config.incidents_collection,
            &config.actions_collection,
        ));

        Self {
            scanner: HealthScanner::new(telemetry, thresholds),
            reasoner: Reasoner::new(model),
            revision_client,
            dispatcher: Dispatcher::new(bus),
            store,
            metrics: Arc::new(fleetop_observe::OperationsMetrics::new()),
            audit: Arc::new(fleetop_observe::AuditLogger::default_capacity()),
            last_scan: RwLock::new(None),
            config,
        }
    }

    /// The summary produced by the most recent `scan_all` call, if any has
    /// run yet. Read-only status endpoints serve from this cache instead of
    /// triggering a fresh scan cycle on every poll.
    pub fn last_scan(&self) -> Option<ScanReport> {
        self.last_scan.read().clone()
    }

    /// Scan every configured target concurrently, reason about each
    /// anomaly, persist a `DETECTED` incident, and publish an action
    /// envelope when the recommendation calls for one. A failure scanning
    /// or reasoning about one service never blocks another; a persistence
    /// or publish failure for one anomaly is logged and does not fail the
    /// scan as a whole.
    #[tracing::instrument(name = "scan_cycle", skip(self), fields(scan_id))]
    pub async fn scan_all(&self) -> ScanReport {
        let scan_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("scan_id", tracing::field::display(&scan_id));

        let started_at = chrono::Utc::now();
        let targets = self.config.targets.clone();

        let details = futures_util::future::join_all(targets.iter().map(|target| self.scan_one(target))).await;

        let services_scanned = details.len();
        let anomalies_detected = details.iter().filter(|d| d.has_anomaly).count();
        let actions_recommended = details
            .iter()
            .filter(|d| matches!(d.recommendation, Some(a) if a != ActionType::None))
            .count();

        self.metrics.record_scan_cycle(services_scanned as u64);
        for _ in 0..anomalies_detected {
            self.metrics.record_anomaly();
        }

        let report = ScanReport {
            scan_id: scan_id.clone(),
            timestamp: chrono::Utc::now(),
            services_scanned,
            anomalies_detected,
            actions_recommended,
            details,
        };

        *self.last_scan.write() = Some(report.clone());

        let duration_ms = (chrono::Utc::now() - started_at).num_milliseconds().max(0) as u64;
        let mut audit_details = HashMap::new();
        audit_details.insert("services_scanned".to_string(), services_scanned.to_string());
        audit_details.insert("anomalies_detected".to_string(), anomalies_detected.to_string());
        audit_details.insert("actions_recommended".to_string(), actions_recommended.to_string());
        self.audit.log(
            "supervisor",
            OperationKind::ScanCycle,
            Some(scan_id.as_str()),
            OperationOutcome::Success,
            Some(duration_ms),
            audit_details,
        );

        report
    }

    #[tracing::instrument(skip(self, target), fields(service = %target.name, region = %target.region))]
    async fn scan_one(&self, target: &fleetop_proto::ServiceTarget) -> ServiceScanDetail {
        let health = self.scanner.scan(target).await;

        if !health.has_anomaly {
            return ServiceScanDetail {
                service: health.service,
                region: health.region,
                status: health.status,
                has_anomaly: false,
                error_rate: health.metrics.error_rate,
                latency_p95_ms: health.metrics.latency_p95_ms,
                recommendation: None,
                incident_id: None,
            };
        }

        let facts = match self.revision_client.fetch(&target.name, &target.region).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(service = %target.name, error = %e, "failed to fetch revision facts; reasoning without them");
                fleetop_reasoner::PlatformFacts::default()
            }
        };

        let recommendation = self.reasoner.recommend(&health, &facts).await;

        let incident = self.store.create_incident(
            &health.service,
            &health.region,
            health.metrics,
            health.log_samples.clone(),
            health.anomaly_summary.clone().unwrap_or_default(),
            Some(recommendation.clone()),
        );
        self.metrics.record_incident_created();
        self.audit.log(
            "supervisor",
            OperationKind::IncidentDetected,
            Some(incident.id.as_str()),
            OperationOutcome::Success,
            None,
            HashMap::new(),
        );

        let mut incident_id = Some(incident.id.clone());

        if recommendation.action != ActionType::None {
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

            match self.dispatcher.publish(&envelope).await {
                Ok(message_id) => {
                    self.metrics.record_action_published();
                    info!(incident_id = %incident.id, message_id, "action dispatched");
                    let mut details = HashMap::new();
                    details.insert("action".to_string(), envelope.action.to_string());
                    details.insert("message_id".to_string(), message_id);
                    self.audit.log(
                        "supervisor",
                        OperationKind::ActionPublished,
                        Some(incident.id.as_str()),
                        OperationOutcome::Success,
                        None,
                        details,
                    );
                    if let Err(e) = self.store.transition(&incident.id, IncidentStatus::ActionPending, |_| {}) {
                        warn!(incident_id = %incident.id, error = %e, "failed to transition incident to action_pending");
                    }
                }
                Err(e) => {
                    self.metrics.record_action_publish_error();
                    warn!(incident_id = %incident.id, error = %e, "failed to publish action envelope");
                    self.audit.log(
                        "supervisor",
                        OperationKind::ActionPublished,
                        Some(incident.id.as_str()),
                        OperationOutcome::Failure,
                        None,
                        HashMap::new(),
                    );
                }
            }
        } else {
            incident_id = Some(incident.id);
        }

        ServiceScanDetail {
            service: health.service,
            region: health.region,
            status: health.status,
            has_anomaly: true,
            error_rate: health.metrics.error_rate,
            latency_p95_ms: health.metrics.latency_p95_ms,
            recommendation: Some(recommendation.action),
            incident_id,
        }
    }
}
