use fleetop_config::FleetConfig;
use fleetop_executor::Executor;
use fleetop_observe::{OperationKind, OperationOutcome};
use fleetop_proto::{ActionAudit, ActionEnvelope, ActionResult, IncidentStatus};
use fleetop_store::IncidentStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct AppState {
    pub config: FleetConfig,
    pub executor: Executor<crate::control_plane::HttpControlPlane>,
    pub store: Arc<IncidentStore>,
    pub metrics: Arc<fleetop_observe::OperationsMetrics>,
    pub audit: Arc<fleetop_observe::AuditLogger>,
}

impl AppState {
    pub fn new(config: FleetConfig) -> Self {
        let control_plane = crate::control_plane::HttpControlPlane::new(
            config.control_plane_api_base_url.clone(),
            config.control_plane_api_key.clone(),
            config.project_id.clone(),
        );
        let executor = Executor::new(control_plane, config.executor_bounds, config.dry_run_mode);

        let state_dir = std::path::PathBuf::from(&config.state_dir);
        let store = Arc::new(IncidentStore::new(
            &state_dir,
            &config.incidents_collection,
            &config.actions_collection,
        ));

        Self {
            executor,
            store,
            metrics: Arc::new(fleetop_observe::OperationsMetrics::new()),
            audit: Arc::new(fleetop_observe::AuditLogger::default_capacity()),
            config,
        }
    }

    /// Apply one dispatched action envelope end to end: transition the
    /// incident into `REMEDIATING` (creating a stub if the Fixer's view of
    /// the store hasn't caught up with the Supervisor's write yet), execute
    /// the mutation, and record a terminal `RESOLVED`/`FAILED` transition
    /// plus an append-only action audit row. The incident-store write is
    /// best-effort: a write failure is logged, never raised, because the
    /// control-plane mutation it describes has already happened.
    #[tracing::instrument(skip(self, envelope), fields(incident_id = %envelope.incident_id))]
    pub async fn process_envelope(&self, envelope: &ActionEnvelope) -> ActionResult {
        let incident = self
            .store
            .get_or_create_stub(&envelope.incident_id, &envelope.service, &envelope.region);

        if incident.status != IncidentStatus::Remediating {
            if let Err(e) = self.store.transition(&incident.id, IncidentStatus::Remediating, |inc| {
                inc.remediation_started_at = Some(chrono::Utc::now());
            }) {
                warn!(incident_id = %incident.id, error = %e, "failed to transition incident to remediating");
            }
        }

        let started_at = chrono::Utc::now();
        let result = self.executor.execute(envelope).await;
        self.metrics.record_action_executed(result.success);

        let duration_ms = (chrono::Utc::now() - started_at).num_milliseconds().max(0) as u64;
        let mut details = HashMap::new();
        details.insert("action".to_string(), envelope.action.to_string());
        self.audit.log(
            "fixer",
            OperationKind::ActionExecuted,
            Some(incident.id.as_str()),
            if result.success {
                OperationOutcome::Success
            } else {
                OperationOutcome::Failure
            },
            Some(duration_ms),
            details,
        );

        let terminal_status = if result.success {
            IncidentStatus::Resolved
        } else {
            IncidentStatus::Failed
        };

        let resolved_at = chrono::Utc::now();
        let action_result = result.clone();
        let transition = if result.success {
            self.store.transition(&incident.id, terminal_status, |inc| {
                inc.resolved_at = Some(resolved_at);
                inc.mttr_seconds = Some((resolved_at - inc.detected_at).num_seconds());
                inc.action_result = Some(action_result.clone());
            })
        } else {
            self.store.transition(&incident.id, terminal_status, |inc| {
                inc.resolved_at = Some(resolved_at);
                inc.action_result = Some(action_result.clone());
            })
        };

        match transition {
            Ok(updated) => {
                info!(
                    incident_id = %incident.id,
                    status = %updated.status,
                    mttr_seconds = ?updated.mttr_seconds,
                    "incident reached terminal state"
                );
            }
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "failed to record terminal incident transition");
            }
        }

        self.store.record_action(ActionAudit::from_result(&incident.id, &result));
        result
    }
}
