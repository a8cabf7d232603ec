//! Platform executor.
//!
//! Applies the two supported mutations — traffic rollback and scaling
//! update — against a control plane reached through the [`ControlPlane`]
//! trait. Both mutations are read-modify-write and idempotent under their
//! stated preconditions, so bus redelivery is safe. `DRY_RUN_MODE` is read
//! once at construction; flipping it requires a process restart.

#![forbid(unsafe_code)]

use fleetop_config::ExecutorBounds;
use fleetop_proto::{ActionEnvelope, ActionResult, ActionType, ScaleParams};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("service {service} not found in {region}")]
    NotFound { service: String, region: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("control-plane operation timed out after {deadline_secs}s (operation_id={operation_id:?})")]
    Timeout {
        deadline_secs: u64,
        operation_id: Option<String>,
    },

    #[error("control-plane call failed: {0}")]
    Backend(#[source] anyhow::Error),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Current scaling configuration for a service revision template.
#[derive(Debug, Clone, Copy)]
pub struct ScalingState {
    pub min_instances: u32,
    pub max_instances: u32,
}

/// The subset of a managed-container control plane the executor needs.
/// Implementors talk to one concrete platform; the [`InMemoryControlPlane`]
/// fake backs tests without touching any network.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    async fn current_traffic(&self, service: &str, region: &str) -> ExecutorResult<HashMap<String, u32>>;
    async fn list_revisions(&self, service: &str, region: &str) -> ExecutorResult<Vec<String>>;
    async fn current_scaling(&self, service: &str, region: &str) -> ExecutorResult<ScalingState>;

    /// Submit the traffic update and block until the long-running operation
    /// completes. Returns the resulting traffic split and an operation id.
    async fn apply_traffic(
        &self,
        service: &str,
        region: &str,
        target_revision: &str,
        percentage: u32,
    ) -> ExecutorResult<(HashMap<String, u32>, String)>;

    /// Submit the scaling update and block until the long-running
    /// operation completes. Returns the resulting `(min, max)` and an
    /// operation id.
    async fn apply_scaling(
        &self,
        service: &str,
        region: &str,
        min_instances: u32,
        max_instances: u32,
    ) -> ExecutorResult<((u32, u32), String)>;
}

const CONTROL_PLANE_DEADLINE: Duration = Duration::from_secs(300);

pub struct Executor<C: ControlPlane> {
    control_plane: C,
    bounds: ExecutorBounds,
    dry_run: bool,
}

impl<C: ControlPlane> Executor<C> {
    pub fn new(control_plane: C, bounds: ExecutorBounds, dry_run: bool) -> Self {
        if dry_run {
            warn!("executor constructed in dry-run mode; no control-plane mutations will be applied");
        }
        Self {
            control_plane,
            bounds,
            dry_run,
        }
    }

    /// Dispatch one envelope by action type. Never returns `Err`: every
    /// failure mode is folded into `ActionResult { success: false,
    /// error_message: Some(..) }` so the caller can always proceed to a
    /// terminal incident write.
    pub async fn execute(&self, envelope: &ActionEnvelope) -> ActionResult {
        let outcome = match envelope.action {
            ActionType::Rollback => match &envelope.target_revision {
                Some(target_revision) => {
                    self.rollback(&envelope.service, &envelope.region, target_revision, 100)
                        .await
                }
                None => Err(ExecutorError::InvalidArgument(
                    "ROLLBACK action is missing target_revision".to_string(),
                )),
            },
            ActionType::ScaleUp | ActionType::ScaleDown => match envelope.scale_params {
                Some(ScaleParams { min_instances, max_instances }) => {
                    self.update_scaling(&envelope.service, &envelope.region, min_instances, max_instances)
                        .await
                }
                None => Err(ExecutorError::InvalidArgument(
                    "scaling action is missing scale_params".to_string(),
                )),
            },
            ActionType::Redeploy => Err(ExecutorError::InvalidArgument(
                "REDEPLOY is not implemented by this executor".to_string(),
            )),
            ActionType::None => Ok(ActionResult {
                action: ActionType::None,
                success: true,
                dry_run: self.dry_run,
                old_traffic: None,
                new_traffic: None,
                old_min_instances: None,
                old_max_instances: None,
                new_min_instances: None,
                new_max_instances: None,
                operation_id: None,
                error_message: None,
            }),
        };

        match outcome {
            Ok(mut result) => {
                result.action = envelope.action;
                result
            }
            Err(e) => {
                warn!(service = %envelope.service, action = %envelope.action, error = %e, "action execution failed");
                ActionResult {
                    action: envelope.action,
                    success: false,
                    dry_run: self.dry_run,
                    old_traffic: None,
                    new_traffic: None,
                    old_min_instances: None,
                    old_max_instances: None,
                    new_min_instances: None,
                    new_max_instances: None,
                    operation_id: None,
                    error_message: Some(e.to_string()),
                }
            }
        }
    }

    /// `ROLLBACK(service, region, target_revision, percentage)`. Routes all
    /// specified traffic to `target_revision`, replacing any existing
    /// split. Requires `target_revision` to be among the service's known
    /// revisions.
    pub async fn rollback(
        &self,
        service: &str,
        region: &str,
        target_revision: &str,
        percentage: u32,
    ) -> ExecutorResult<ActionResult> {
        let revisions = self.control_plane.list_revisions(service, region).await?;
        if !revisions.iter().any(|r| r == target_revision) {
            return Err(ExecutorError::InvalidArgument(format!(
                "target revision {target_revision} not found; available: {revisions:?}"
            )));
        }

        let old_traffic = self.control_plane.current_traffic(service, region).await?;

        if self.dry_run {
            info!(service, target_revision, "[dry run] would roll back traffic");
            let mut new_traffic = HashMap::new();
            new_traffic.insert(target_revision.to_string(), percentage);
            return Ok(ActionResult {
                action: ActionType::Rollback,
                success: true,
                dry_run: true,
                old_traffic: Some(old_traffic),
                new_traffic: Some(new_traffic),
                old_min_instances: None,
                old_max_instances: None,
                new_min_instances: None,
                new_max_instances: None,
                operation_id: None,
                error_message: None,
            });
        }

        let call = self.control_plane.apply_traffic(service, region, target_revision, percentage);
        let (new_traffic, operation_id) = match tokio::time::timeout(CONTROL_PLANE_DEADLINE, call).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExecutorError::Timeout {
                    deadline_secs: CONTROL_PLANE_DEADLINE.as_secs(),
                    operation_id: None,
                });
            }
        };

        info!(service, target_revision, operation_id = %operation_id, "rollback complete");
        Ok(ActionResult {
            action: ActionType::Rollback,
            success: true,
            dry_run: false,
            old_traffic: Some(old_traffic),
            new_traffic: Some(new_traffic),
            old_min_instances: None,
            old_max_instances: None,
            new_min_instances: None,
            new_max_instances: None,
            operation_id: Some(operation_id),
            error_message: None,
        })
    }

    /// `UPDATE_SCALING(service, region, min?, max?)`. Clamps each supplied
    /// bound into its configured safety range, preserves any bound left
    /// unspecified, and rejects `effective_min > effective_max`.
    pub async fn update_scaling(
        &self,
        service: &str,
        region: &str,
        min_instances: Option<u32>,
        max_instances: Option<u32>,
    ) -> ExecutorResult<ActionResult> {
        let current = self.control_plane.current_scaling(service, region).await?;

        let clamped_min = min_instances
            .map(|v| v.clamp(self.bounds.min_instances_floor, self.bounds.min_instances_ceiling));
        let clamped_max = max_instances
            .map(|v| v.clamp(self.bounds.max_instances_floor, self.bounds.max_instances_ceiling));

        let effective_min = clamped_min.unwrap_or(current.min_instances);
        let effective_max = clamped_max.unwrap_or(current.max_instances);

        if effective_min > effective_max {
            return Err(ExecutorError::InvalidArgument(format!(
                "min_instances ({effective_min}) cannot be greater than max_instances ({effective_max})"
            )));
        }

        if self.dry_run {
            info!(service, effective_min, effective_max, "[dry run] would update scaling");
            return Ok(ActionResult {
                action: ActionType::ScaleUp,
                success: true,
                dry_run: true,
                old_traffic: None,
                new_traffic: None,
                old_min_instances: Some(current.min_instances),
                old_max_instances: Some(current.max_instances),
                new_min_instances: Some(effective_min),
                new_max_instances: Some(effective_max),
                operation_id: None,
                error_message: None,
            });
        }

        let call = self
            .control_plane
            .apply_scaling(service, region, effective_min, effective_max);
        let ((new_min, new_max), operation_id) = match tokio::time::timeout(CONTROL_PLANE_DEADLINE, call).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExecutorError::Timeout {
                    deadline_secs: CONTROL_PLANE_DEADLINE.as_secs(),
                    operation_id: None,
                });
            }
        };

        info!(service, new_min, new_max, operation_id = %operation_id, "scaling updated");
        Ok(ActionResult {
            action: ActionType::ScaleUp,
            success: true,
            dry_run: false,
            old_traffic: None,
            new_traffic: None,
            old_min_instances: Some(current.min_instances),
            old_max_instances: Some(current.max_instances),
            new_min_instances: Some(new_min),
            new_max_instances: Some(new_max),
            operation_id: Some(operation_id),
            error_message: None,
        })
    }
}

/// An in-memory control plane for tests: one service, mutable traffic and
/// scaling state, no network.
pub struct InMemoryControlPlane {
    state: parking_lot::Mutex<InMemoryState>,
}

struct InMemoryState {
    traffic: HashMap<String, u32>,
    revisions: Vec<String>,
    scaling: ScalingState,
    known_service: bool,
}

impl InMemoryControlPlane {
    pub fn new(revisions: Vec<String>, traffic: HashMap<String, u32>, scaling: ScalingState) -> Self {
        Self {
            state: parking_lot::Mutex::new(InMemoryState {
                traffic,
                revisions,
                scaling,
                known_service: true,
            }),
        }
    }

    pub fn unknown_service() -> Self {
        Self {
            state: parking_lot::Mutex::new(InMemoryState {
                traffic: HashMap::new(),
                revisions: Vec::new(),
                scaling: ScalingState {
                    min_instances: 0,
                    max_instances: 10,
                },
                known_service: false,
            }),
        }
    }
}

#[async_trait::async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn current_traffic(&self, _service: &str, _region: &str) -> ExecutorResult<HashMap<String, u32>> {
        let state = self.state.lock();
        if !state.known_service {
            return Err(ExecutorError::NotFound {
                service: _service.to_string(),
                region: _region.to_string(),
            });
        }
        Ok(state.traffic.clone())
    }

    async fn list_revisions(&self, service: &str, region: &str) -> ExecutorResult<Vec<String>> {
        let state = self.state.lock();
        if !state.known_service {
            return Err(ExecutorError::NotFound {
                service: service.to_string(),
                region: region.to_string(),
            });
        }
        Ok(state.revisions.clone())
    }

    async fn current_scaling(&self, service: &str, region: &str) -> ExecutorResult<ScalingState> {
        let state = self.state.lock();
        if !state.known_service {
            return Err(ExecutorError::NotFound {
                service: service.to_string(),
                region: region.to_string(),
            });
        }
        Ok(state.scaling)
    }

    async fn apply_traffic(
        &self,
        _service: &str,
        _region: &str,
        target_revision: &str,
        percentage: u32,
    ) -> ExecutorResult<(HashMap<String, u32>, String)> {
        let mut state = self.state.lock();
        let mut new_traffic = HashMap::new();
        new_traffic.insert(target_revision.to_string(), percentage);
        state.traffic = new_traffic.clone();
        Ok((new_traffic, uuid::Uuid::new_v4().to_string()))
    }

    async fn apply_scaling(
        &self,
        _service: &str,
        _region: &str,
        min_instances: u32,
        max_instances: u32,
    ) -> ExecutorResult<((u32, u32), String)> {
        let mut state = self.state.lock();
        state.scaling = ScalingState {
            min_instances,
            max_instances,
        };
        Ok(((min_instances, max_instances), uuid::Uuid::new_v4().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> ExecutorBounds {
        ExecutorBounds {
            min_instances_floor: 0,
            min_instances_ceiling: 5,
            max_instances_floor: 10,
            max_instances_ceiling: 100,
        }
    }

    fn plane_with_history() -> InMemoryControlPlane {
        let mut traffic = HashMap::new();
        traffic.insert("svc-00003-abc".to_string(), 100);
        InMemoryControlPlane::new(
            vec!["svc-00003-abc".to_string(), "svc-00002-xyz".to_string()],
            traffic,
            ScalingState {
                min_instances: 1,
                max_instances: 20,
            },
        )
    }

    fn rollback_envelope(target_revision: Option<&str>) -> ActionEnvelope {
        ActionEnvelope {
            incident_id: "inc_svc_1".to_string(),
            service: "svc".to_string(),
            region: "us-central1".to_string(),
            action: ActionType::Rollback,
            target_revision: target_revision.map(String::from),
            scale_params: None,
            reason: "high error rate".to_string(),
            confidence: 0.9,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn rollback_to_known_revision_succeeds() {
        let executor = Executor::new(plane_with_history(), bounds(), false);
        let result = executor
            .rollback("svc", "us-central1", "svc-00002-xyz", 100)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.new_traffic.unwrap().get("svc-00002-xyz"), Some(&100));
        assert!(result.operation_id.is_some());
    }

    #[tokio::test]
    async fn rollback_to_unknown_revision_is_invalid_argument() {
        let executor = Executor::new(plane_with_history(), bounds(), false);
        let err = executor
            .rollback("svc", "us-central1", "svc-99999-zzz", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn rollback_against_unknown_service_is_not_found() {
        let executor = Executor::new(InMemoryControlPlane::unknown_service(), bounds(), false);
        let err = executor
            .rollback("ghost", "us-central1", "ghost-00001", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn dry_run_mode_short_circuits_before_any_mutation() {
        let plane = plane_with_history();
        let executor = Executor::new(plane, bounds(), true);
        let result = executor
            .rollback("svc", "us-central1", "svc-00002-xyz", 100)
            .await
            .unwrap();
        assert!(result.dry_run);
        assert!(result.operation_id.is_none());
    }

    #[tokio::test]
    async fn scaling_clamps_out_of_range_bounds() {
        let executor = Executor::new(plane_with_history(), bounds(), false);
        let result = executor
            .update_scaling("svc", "us-central1", Some(999), Some(1))
            .await
            .unwrap();
        assert_eq!(result.new_min_instances, Some(5));
        assert_eq!(result.new_max_instances, Some(10));
    }

    #[tokio::test]
    async fn scaling_preserves_unspecified_bound() {
        let executor = Executor::new(plane_with_history(), bounds(), false);
        let result = executor
            .update_scaling("svc", "us-central1", Some(2), None)
            .await
            .unwrap();
        assert_eq!(result.new_min_instances, Some(2));
        assert_eq!(result.new_max_instances, Some(20));
    }

    #[tokio::test]
    async fn execute_dispatches_rollback_by_action_type() {
        let executor = Executor::new(plane_with_history(), bounds(), false);
        let result = executor.execute(&rollback_envelope(Some("svc-00002-xyz"))).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn execute_rollback_missing_target_revision_fails_gracefully() {
        let executor = Executor::new(plane_with_history(), bounds(), false);
        let result = executor.execute(&rollback_envelope(None)).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("target_revision"));
    }

    #[tokio::test]
    async fn execute_redeploy_is_reported_as_unimplemented() {
        let executor = Executor::new(plane_with_history(), bounds(), false);
        let mut envelope = rollback_envelope(None);
        envelope.action = ActionType::Redeploy;
        let result = executor.execute(&envelope).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("not implemented"));
    }

    #[tokio::test]
    async fn execute_none_action_is_a_trivial_success() {
        let executor = Executor::new(plane_with_history(), bounds(), false);
        let mut envelope = rollback_envelope(None);
        envelope.action = ActionType::None;
        let result = executor.execute(&envelope).await;
        assert!(result.success);
    }
}
