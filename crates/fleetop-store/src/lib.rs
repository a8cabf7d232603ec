//! Incident store client.
//!
//! Backs the two document-store collections (`incidents`, `actions`) with
//! [`fleetop_persist::JsonStore`] snapshots, and enforces the incident DAG
//! from `fleetop_proto::IncidentStatus` on every transition. In a real
//! deployment the snapshot file is replaced by a managed document store;
//! the collection/field shape is unchanged either way.

#![forbid(unsafe_code)]

use chrono::Utc;
use fleetop_persist::JsonStore;
use fleetop_proto::{ActionAudit, HealthMetrics, Incident, IncidentStatus, LogSample, Recommendation};
use parking_lot::RwLock;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("incident {0} not found")]
    NotFound(String),

    #[error("invalid transition for incident {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error("incident {0} is in a terminal state; record is write-once")]
    TerminalStateViolation(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Incident + action-audit persistence with DAG-validated transitions.
pub struct IncidentStore {
    incidents: RwLock<std::collections::HashMap<String, Incident>>,
    actions: RwLock<Vec<ActionAudit>>,
    incidents_store: JsonStore,
    actions_store: JsonStore,
}

impl IncidentStore {
    pub fn new(state_path: &Path, incidents_collection: &str, actions_collection: &str) -> Self {
        let incidents_store = JsonStore::new(state_path, incidents_collection);
        let actions_store = JsonStore::new(state_path, actions_collection);
        let incidents = incidents_store.load();
        let actions_map: std::collections::HashMap<String, ActionAudit> = actions_store.load();
        info!(
            incidents = incidents.len(),
            actions = actions_map.len(),
            "loaded incident store from disk"
        );
        Self {
            incidents: RwLock::new(incidents),
            actions: RwLock::new(actions_map.into_values().collect()),
            incidents_store,
            actions_store,
        }
    }

    /// Create a new `DETECTED` incident. Id collisions within the same
    /// wall-clock second for the same service are accepted by design — see
    /// the idempotency note in the Supervisor loop contract.
    pub fn create_incident(
        &self,
        service: &str,
        region: &str,
        metrics_snapshot: HealthMetrics,
        log_samples: Vec<LogSample>,
        anomaly_summary: String,
        recommendation: Option<Recommendation>,
    ) -> Incident {
        let detected_at = Utc::now();
        let incident = Incident {
            id: Incident::make_id(service, detected_at),
            service: service.to_string(),
            region: region.to_string(),
            status: IncidentStatus::Detected,
            detected_at,
            remediation_started_at: None,
            resolved_at: None,
            metrics_snapshot,
            log_samples,
            anomaly_summary,
            recommendation,
            action_result: None,
            mttr_seconds: None,
        };

        let mut incidents = self.incidents.write();
        incidents.insert(incident.id.clone(), incident.clone());
        self.snapshot_incidents(&incidents);
        incident
    }

    /// If the incident does not exist (e.g. the Fixer received an envelope
    /// before its own eventual-consistency view of the store caught up),
    /// create a minimal stub rather than drop the action.
    pub fn get_or_create_stub(
        &self,
        incident_id: &str,
        service: &str,
        region: &str,
    ) -> Incident {
        {
            let incidents = self.incidents.read();
            if let Some(existing) = incidents.get(incident_id) {
                return existing.clone();
            }
        }
        warn!(incident_id, "incident not found, creating minimal stub");
        let detected_at = Utc::now();
        let stub = Incident {
            id: incident_id.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            status: IncidentStatus::Detected,
            detected_at,
            remediation_started_at: None,
            resolved_at: None,
            metrics_snapshot: HealthMetrics::new(0, 0, None),
            log_samples: Vec::new(),
            anomaly_summary: "stub created by Fixer on unknown incident".to_string(),
            recommendation: None,
            action_result: None,
            mttr_seconds: None,
        };
        let mut incidents = self.incidents.write();
        incidents.insert(stub.id.clone(), stub.clone());
        self.snapshot_incidents(&incidents);
        stub
    }

    /// Validate and apply a DAG transition, mutating whatever fields the
    /// caller supplies via `patch`. Rejects non-monotone transitions and any
    /// attempt to mutate a terminal record, leaving the stored record
    /// unchanged in both cases.
    pub fn transition(
        &self,
        id: &str,
        to: IncidentStatus,
        patch: impl FnOnce(&mut Incident),
    ) -> StoreResult<Incident> {
        let mut incidents = self.incidents.write();
        let incident = incidents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if incident.status.is_terminal() {
            return Err(StoreError::TerminalStateViolation(id.to_string()));
        }
        if !incident.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: incident.status,
                to,
            });
        }

        incident.status = to;
        patch(incident);
        let result = incident.clone();
        self.snapshot_incidents(&incidents);
        Ok(result)
    }

    /// Append-only audit write for one executed action.
    pub fn record_action(&self, audit: ActionAudit) {
        let mut actions = self.actions.write();
        actions.push(audit);
        self.snapshot_actions(&actions);
    }

    pub fn get(&self, id: &str) -> Option<Incident> {
        self.incidents.read().get(id).cloned()
    }

    /// Reverse-chronological by `detected_at`, optionally filtered by status.
    pub fn list(&self, limit: usize, status: Option<IncidentStatus>) -> Vec<Incident> {
        let incidents = self.incidents.read();
        let mut all: Vec<Incident> = incidents
            .values()
            .filter(|inc| status.is_none_or(|s| inc.status == s))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        all.truncate(limit);
        all
    }

    fn snapshot_incidents(&self, incidents: &std::collections::HashMap<String, Incident>) {
        if let Err(e) = self.incidents_store.save(incidents) {
            warn!(error = %e, "failed to snapshot incident store");
        }
    }

    fn snapshot_actions(&self, actions: &[ActionAudit]) {
        let keyed: std::collections::HashMap<String, &ActionAudit> = actions
            .iter()
            .map(|a| (uuid::Uuid::new_v4().to_string(), a))
            .collect();
        if let Err(e) = self.actions_store.save(&keyed) {
            warn!(error = %e, "failed to snapshot action audit log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetop_proto::{ActionResult, ActionType};

    fn fixture_store() -> (tempfile::TempDir, IncidentStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = IncidentStore::new(dir.path(), "incidents", "actions");
        (dir, store)
    }

    #[test]
    fn create_then_get_roundtrips() {
        let (_dir, store) = fixture_store();
        let incident = store.create_incident(
            "demo-app-a",
            "us-central1",
            HealthMetrics::new(1000, 150, Some(1200.0)),
            vec![],
            "high error rate".to_string(),
            None,
        );
        let fetched = store.get(&incident.id).expect("must exist");
        assert_eq!(fetched.status, IncidentStatus::Detected);
        assert_eq!(fetched.service, "demo-app-a");
    }

    #[test]
    fn valid_transition_chain_succeeds() {
        let (_dir, store) = fixture_store();
        let incident = store.create_incident(
            "svc",
            "us-central1",
            HealthMetrics::new(1000, 150, Some(1200.0)),
            vec![],
            "anomaly".to_string(),
            None,
        );

        store
            .transition(&incident.id, IncidentStatus::ActionPending, |_| {})
            .expect("detected->action_pending");
        store
            .transition(&incident.id, IncidentStatus::Remediating, |inc| {
                inc.remediation_started_at = Some(Utc::now());
            })
            .expect("action_pending->remediating");
        let resolved = store
            .transition(&incident.id, IncidentStatus::Resolved, |inc| {
                inc.resolved_at = Some(Utc::now());
                inc.mttr_seconds = Some(10);
            })
            .expect("remediating->resolved");

        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert_eq!(resolved.mttr_seconds, Some(10));
    }

    #[test]
    fn skipping_states_is_rejected() {
        let (_dir, store) = fixture_store();
        let incident = store.create_incident(
            "svc",
            "us-central1",
            HealthMetrics::new(1000, 150, Some(1200.0)),
            vec![],
            "anomaly".to_string(),
            None,
        );

        let err = store
            .transition(&incident.id, IncidentStatus::Remediating, |_| {})
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        // Record is unchanged.
        assert_eq!(store.get(&incident.id).unwrap().status, IncidentStatus::Detected);
    }

    #[test]
    fn terminal_state_is_write_once() {
        let (_dir, store) = fixture_store();
        let incident = store.create_incident(
            "svc",
            "us-central1",
            HealthMetrics::new(1000, 150, Some(1200.0)),
            vec![],
            "anomaly".to_string(),
            None,
        );
        store
            .transition(&incident.id, IncidentStatus::ActionPending, |_| {})
            .unwrap();
        store
            .transition(&incident.id, IncidentStatus::Remediating, |_| {})
            .unwrap();
        store
            .transition(&incident.id, IncidentStatus::Resolved, |_| {})
            .unwrap();

        let err = store
            .transition(&incident.id, IncidentStatus::Failed, |_| {})
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalStateViolation(_)));
    }

    #[test]
    fn stub_created_when_incident_missing() {
        let (_dir, store) = fixture_store();
        let stub = store.get_or_create_stub("inc_unknown_123", "svc", "us-central1");
        assert_eq!(stub.id, "inc_unknown_123");
        assert_eq!(stub.status, IncidentStatus::Detected);
        assert!(store.get("inc_unknown_123").is_some());
    }

    #[test]
    fn record_action_is_append_only() {
        let (_dir, store) = fixture_store();
        let audit = ActionAudit::from_result(
            "inc_x_1",
            &ActionResult {
                action: ActionType::Rollback,
                success: true,
                dry_run: false,
                old_traffic: None,
                new_traffic: None,
                old_min_instances: None,
                old_max_instances: None,
                new_min_instances: None,
                new_max_instances: None,
                operation_id: Some("op-1".to_string()),
                error_message: None,
            },
        );
        store.record_action(audit);
        assert_eq!(store.actions.read().len(), 1);
    }

    #[test]
    fn list_is_reverse_chronological_and_filterable() {
        let (_dir, store) = fixture_store();
        let a = store.create_incident(
            "svc-a",
            "us-central1",
            HealthMetrics::new(100, 10, None),
            vec![],
            "x".into(),
            None,
        );
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = store.create_incident(
            "svc-b",
            "us-central1",
            HealthMetrics::new(100, 10, None),
            vec![],
            "y".into(),
            None,
        );
        store
            .transition(&b.id, IncidentStatus::ActionPending, |_| {})
            .unwrap();

        let all = store.list(10, None);
        assert_eq!(all[0].id, b.id);
        assert_eq!(all[1].id, a.id);

        let pending = store.list(10, Some(IncidentStatus::ActionPending));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
    }
}
