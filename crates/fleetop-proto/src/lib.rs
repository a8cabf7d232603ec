//! Shared domain types for the fleet operator.
//!
//! Every cross-crate payload — health assessments, recommendations,
//! incidents, bus envelopes, audit rows — is defined here so the Supervisor
//! and Fixer binaries never duplicate a schema.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ─────────────────────────────────────────────────────────────
// ServiceTarget
// ─────────────────────────────────────────────────────────────

/// The unit of monitoring: a logical service plus its platform region and
/// optional per-service threshold overrides. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub error_threshold: Option<f64>,
    #[serde(default)]
    pub latency_p95_threshold_ms: Option<f64>,
    #[serde(default)]
    pub min_request_count: Option<u64>,
    /// `(min_floor, min_ceiling)` override for the executor's safety clamp.
    #[serde(default)]
    pub min_instances_range: Option<(u32, u32)>,
    /// `(max_floor, max_ceiling)` override for the executor's safety clamp.
    #[serde(default)]
    pub max_instances_range: Option<(u32, u32)>,
    /// If true, actions for this service are logged as pending confirmation
    /// rather than dispatched automatically. Not enforced by this crate —
    /// consumers decide what to do with the flag.
    #[serde(default)]
    pub confirmation_required: bool,
}

impl ServiceTarget {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            error_threshold: None,
            latency_p95_threshold_ms: None,
            min_request_count: None,
            min_instances_range: None,
            max_instances_range: None,
            confirmation_required: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────
// HealthMetrics
// ─────────────────────────────────────────────────────────────

/// A telemetry snapshot over a fixed window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HealthMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub latency_p95_ms: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl HealthMetrics {
    /// Build a snapshot, deriving `error_rate` per the invariant:
    /// `error_rate = 100 * error_count / request_count` when
    /// `request_count > 0`, else `0`, rounded to two decimals.
    pub fn new(request_count: u64, error_count: u64, latency_p95_ms: Option<f64>) -> Self {
        let error_rate = if request_count > 0 {
            let raw = 100.0 * error_count as f64 / request_count as f64;
            (raw * 100.0).round() / 100.0
        } else {
            0.0
        };
        Self {
            request_count,
            error_count,
            error_rate,
            latency_p95_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn success_count(&self) -> u64 {
        self.request_count.saturating_sub(self.error_count)
    }
}

// ─────────────────────────────────────────────────────────────
// ServiceStatus / LogSample / ServiceHealth
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Healthy => write!(f, "HEALTHY"),
            ServiceStatus::Degraded => write!(f, "DEGRADED"),
            ServiceStatus::Unhealthy => write!(f, "UNHEALTHY"),
            ServiceStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ServiceStatus {
    /// `has_anomaly` is true iff status is DEGRADED or UNHEALTHY.
    pub fn has_anomaly(&self) -> bool {
        matches!(self, ServiceStatus::Degraded | ServiceStatus::Unhealthy)
    }

    /// Map a violation count to a status, per the deterministic
    /// classification: 0 → HEALTHY, 1 → DEGRADED, >=2 → UNHEALTHY.
    pub fn from_violation_count(count: usize) -> Self {
        match count {
            0 => ServiceStatus::Healthy,
            1 => ServiceStatus::Degraded,
            _ => ServiceStatus::Unhealthy,
        }
    }
}

/// A single truncated error-severity log line captured during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSample {
    pub severity: String,
    pub message: String,
}

impl LogSample {
    pub const MAX_MESSAGE_LEN: usize = 500;

    pub fn new(severity: impl Into<String>, message: impl AsRef<str>) -> Self {
        let message = message.as_ref();
        let truncated = if message.len() > Self::MAX_MESSAGE_LEN {
            message.chars().take(Self::MAX_MESSAGE_LEN).collect()
        } else {
            message.to_string()
        };
        Self {
            severity: severity.into(),
            message: truncated,
        }
    }
}

/// Result of scanning one service: a reduced health assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub region: String,
    pub status: ServiceStatus,
    pub metrics: HealthMetrics,
    pub log_samples: Vec<LogSample>,
    pub has_anomaly: bool,
    pub anomaly_summary: Option<String>,
}

// ─────────────────────────────────────────────────────────────
// ActionType / ScaleParams / Recommendation
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Rollback,
    ScaleUp,
    ScaleDown,
    Redeploy,
    None,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionType::Rollback => "ROLLBACK",
            ActionType::ScaleUp => "SCALE_UP",
            ActionType::ScaleDown => "SCALE_DOWN",
            ActionType::Redeploy => "REDEPLOY",
            ActionType::None => "NONE",
        };
        write!(f, "{s}")
    }
}

impl ActionType {
    /// Parse an uppercased action name, collapsing anything unrecognized to
    /// `None` (per the Reasoner's coercion rule).
    pub fn from_loose_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "ROLLBACK" => ActionType::Rollback,
            "SCALE_UP" => ActionType::ScaleUp,
            "SCALE_DOWN" => ActionType::ScaleDown,
            "REDEPLOY" => ActionType::Redeploy,
            _ => ActionType::None,
        }
    }
}

/// Desired scaling bounds. `min_instances <= max_instances` is validated by
/// callers before acting on a recommendation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScaleParams {
    pub min_instances: Option<u32>,
    pub max_instances: Option<u32>,
}

impl ScaleParams {
    /// True iff both bounds are present and ordered correctly, or at least
    /// one bound is absent (nothing to compare).
    pub fn is_well_ordered(&self) -> bool {
        match (self.min_instances, self.max_instances) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        }
    }
}

/// The Reasoner's structured recommendation for a detected anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: ActionType,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_assessment: String,
    pub expected_impact: String,
    #[serde(default)]
    pub target_revision: Option<String>,
    #[serde(default)]
    pub scale_params: Option<ScaleParams>,
    #[serde(default)]
    pub root_cause_hypothesis: Option<String>,
}

impl Recommendation {
    /// The safe default produced whenever reasoning fails or is inapplicable.
    pub fn none_default(reasoning: impl Into<String>) -> Self {
        Self {
            action: ActionType::None,
            confidence: 0.0,
            reasoning: reasoning.into(),
            risk_assessment: "Unable to assess risk".to_string(),
            expected_impact: "No action will be taken".to_string(),
            target_revision: None,
            scale_params: None,
            root_cause_hypothesis: None,
        }
    }

    /// Clamp confidence into `[0, 1]` in place.
    pub fn clamp_confidence(&mut self) {
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }

    /// Enforce `ROLLBACK ⇒ target_revision is set` and
    /// `SCALE_* ⇒ scale_params is set with min <= max`; downgrades a
    /// violating recommendation to `NONE` rather than returning an error,
    /// matching the Reasoner's total-function contract.
    pub fn enforce_invariants(mut self) -> Self {
        match self.action {
            ActionType::Rollback if self.target_revision.is_none() => {
                Recommendation::none_default(
                    "ROLLBACK recommended without a resolvable target revision",
                )
            }
            ActionType::ScaleUp | ActionType::ScaleDown => match self.scale_params {
                Some(params) if params.is_well_ordered() => self,
                _ => Recommendation::none_default(
                    "scaling action recommended without valid scale_params",
                ),
            },
            _ => {
                self.clamp_confidence();
                self
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────
// IncidentStatus / Incident DAG
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Detected,
    Analyzing,
    ActionPending,
    Remediating,
    Resolved,
    Failed,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentStatus::Detected => "detected",
            IncidentStatus::Analyzing => "analyzing",
            IncidentStatus::ActionPending => "action_pending",
            IncidentStatus::Remediating => "remediating",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl IncidentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Resolved | IncidentStatus::Failed)
    }

    /// True iff `self -> next` is a legal edge in the DAG:
    /// `DETECTED -> ANALYZING -> ACTION_PENDING -> REMEDIATING -> {RESOLVED, FAILED}`,
    /// with `ANALYZING` optional between `DETECTED` and `ACTION_PENDING`.
    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Detected, Analyzing)
                | (Detected, ActionPending)
                | (Analyzing, ActionPending)
                | (ActionPending, Remediating)
                | (Remediating, Resolved)
                | (Remediating, Failed)
        )
    }
}

/// Lifecycle record for a single detected anomaly, keyed by a generated id
/// of the form `inc_<service>_<unix-seconds>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub service: String,
    pub region: String,
    pub status: IncidentStatus,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub remediation_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    pub metrics_snapshot: HealthMetrics,
    #[serde(default)]
    pub log_samples: Vec<LogSample>,
    pub anomaly_summary: String,
    #[serde(default)]
    pub recommendation: Option<Recommendation>,
    #[serde(default)]
    pub action_result: Option<ActionResult>,
    #[serde(default)]
    pub mttr_seconds: Option<i64>,
}

impl Incident {
    /// Build the deterministic id `inc_<service>_<unix-seconds>`.
    pub fn make_id(service: &str, at: DateTime<Utc>) -> String {
        format!("inc_{service}_{}", at.timestamp())
    }
}

// ─────────────────────────────────────────────────────────────
// ActionEnvelope / ActionResult / ActionAudit
// ─────────────────────────────────────────────────────────────

/// The bus payload. Self-sufficient: the Fixer consults nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub incident_id: String,
    pub service: String,
    pub region: String,
    pub action: ActionType,
    #[serde(default)]
    pub target_revision: Option<String>,
    #[serde(default)]
    pub scale_params: Option<ScaleParams>,
    pub reason: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one executor mutation, attached to the incident on a terminal
/// write and persisted separately as an `ActionAudit` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: ActionType,
    pub success: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub old_traffic: Option<HashMap<String, u32>>,
    #[serde(default)]
    pub new_traffic: Option<HashMap<String, u32>>,
    #[serde(default)]
    pub old_min_instances: Option<u32>,
    #[serde(default)]
    pub old_max_instances: Option<u32>,
    #[serde(default)]
    pub new_min_instances: Option<u32>,
    #[serde(default)]
    pub new_max_instances: Option<u32>,
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Append-only audit row for one executed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionAudit {
    pub incident_id: String,
    pub action: ActionType,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub old_traffic: Option<HashMap<String, u32>>,
    #[serde(default)]
    pub new_traffic: Option<HashMap<String, u32>>,
    #[serde(default)]
    pub old_min_instances: Option<u32>,
    #[serde(default)]
    pub old_max_instances: Option<u32>,
    #[serde(default)]
    pub new_min_instances: Option<u32>,
    #[serde(default)]
    pub new_max_instances: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ActionAudit {
    pub fn from_result(incident_id: impl Into<String>, result: &ActionResult) -> Self {
        Self {
            incident_id: incident_id.into(),
            action: result.action,
            executed_at: Utc::now(),
            success: result.success,
            old_traffic: result.old_traffic.clone(),
            new_traffic: result.new_traffic.clone(),
            old_min_instances: result.old_min_instances,
            old_max_instances: result.old_max_instances,
            new_min_instances: result.new_min_instances,
            new_max_instances: result.new_max_instances,
            error_message: result.error_message.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────
// ScanReport
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceScanDetail {
    pub service: String,
    pub region: String,
    pub status: ServiceStatus,
    pub has_anomaly: bool,
    pub error_rate: f64,
    pub latency_p95_ms: Option<f64>,
    #[serde(default)]
    pub recommendation: Option<ActionType>,
    #[serde(default)]
    pub incident_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub timestamp: DateTime<Utc>,
    pub services_scanned: usize,
    pub anomalies_detected: usize,
    pub actions_recommended: usize,
    pub details: Vec<ServiceScanDetail>,
}
