//! Structured observability for the fleet operator.
//!
//! Provides:
//! - [`OperationsMetrics`] — atomic counters for scan/incident/action events
//! - [`MetricsExporter`] — Prometheus text format export
//! - [`AuditLogger`] — structured, queryable log of operational events
//!
//! This is ambient scaffolding distinct from the domain-level `ActionAudit`
//! record in `fleetop-proto`: it tracks *every* operational event (scan
//! cycles, safety-blocked actions), not just executed remediations.

#![forbid(unsafe_code)]

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────
// Atomic Counter
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────
// Operations Metrics
// ─────────────────────────────────────────────────────────────

/// Atomic operation counters for the scan → decide → dispatch → apply
/// pipeline. All counters are thread-safe and can be shared via [`Arc`].
#[derive(Debug, Default)]
pub struct OperationsMetrics {
    pub scan_cycles_total: Counter,
    pub services_scanned_total: Counter,
    pub anomalies_detected_total: Counter,
    pub incidents_created_total: Counter,
    pub actions_published_total: Counter,
    pub actions_publish_errors_total: Counter,
    pub actions_executed_success_total: Counter,
    pub actions_executed_failure_total: Counter,
    pub dry_run_shortcuts_total: Counter,
    pub config_load_errors_total: Counter,
    pub recommendations_parse_failures_total: Counter,
}

impl OperationsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scan_cycle(&self, services_scanned: u64) {
        self.scan_cycles_total.inc();
        self.services_scanned_total
            .0
            .fetch_add(services_scanned, Ordering::Relaxed);
    }

    pub fn record_anomaly(&self) {
        self.anomalies_detected_total.inc();
    }

    pub fn record_incident_created(&self) {
        self.incidents_created_total.inc();
        info!(
            counter = "incidents_created_total",
            value = self.incidents_created_total.get(),
            "incident created"
        );
    }

    pub fn record_action_published(&self) {
        self.actions_published_total.inc();
    }

    pub fn record_action_publish_error(&self) {
        self.actions_publish_errors_total.inc();
        warn!(
            counter = "actions_publish_errors_total",
            value = self.actions_publish_errors_total.get(),
            "action publish failed"
        );
    }

    pub fn record_action_executed(&self, success: bool) {
        if success {
            self.actions_executed_success_total.inc();
        } else {
            self.actions_executed_failure_total.inc();
            warn!(
                counter = "actions_executed_failure_total",
                value = self.actions_executed_failure_total.get(),
                "action execution failed"
            );
        }
    }

    pub fn record_dry_run_shortcut(&self) {
        self.dry_run_shortcuts_total.inc();
    }

    pub fn record_config_load_error(&self) {
        self.config_load_errors_total.inc();
        error!(
            counter = "config_load_errors_total",
            value = self.config_load_errors_total.get(),
            "config load failed"
        );
    }

    pub fn record_recommendation_parse_failure(&self) {
        self.recommendations_parse_failures_total.inc();
    }
}

// ─────────────────────────────────────────────────────────────
// Metrics Exporter (Prometheus text format)
// ─────────────────────────────────────────────────────────────

pub struct MetricsExporter<'a> {
    metrics: &'a OperationsMetrics,
    prefix: String,
}

impl<'a> MetricsExporter<'a> {
    pub fn new(metrics: &'a OperationsMetrics) -> Self {
        Self {
            metrics,
            prefix: "fleetop".to_string(),
        }
    }

    pub fn with_prefix(metrics: &'a OperationsMetrics, prefix: impl Into<String>) -> Self {
        Self {
            metrics,
            prefix: prefix.into(),
        }
    }

    pub fn render(&self) -> String {
        let m = self.metrics;
        let mut out = String::new();

        let counters: [(&str, &str, u64); 11] = [
            ("scan_cycles_total", "Total scan cycles completed", m.scan_cycles_total.get()),
            ("services_scanned_total", "Total per-service scans performed", m.services_scanned_total.get()),
            ("anomalies_detected_total", "Total anomalies detected", m.anomalies_detected_total.get()),
            ("incidents_created_total", "Total incidents created", m.incidents_created_total.get()),
            ("actions_published_total", "Total actions published to the bus", m.actions_published_total.get()),
            ("actions_publish_errors_total", "Total bus publish failures", m.actions_publish_errors_total.get()),
            ("actions_executed_success_total", "Total successful action executions", m.actions_executed_success_total.get()),
            ("actions_executed_failure_total", "Total failed action executions", m.actions_executed_failure_total.get()),
            ("dry_run_shortcuts_total", "Total dry-run short-circuits taken", m.dry_run_shortcuts_total.get()),
            ("config_load_errors_total", "Total configuration load failures", m.config_load_errors_total.get()),
            ("recommendations_parse_failures_total", "Total reasoner JSON parse failures", m.recommendations_parse_failures_total.get()),
        ];

        for (name, help, value) in counters {
            out.push_str(&format!("# HELP {}_{name} {help}\n", self.prefix));
            out.push_str(&format!("# TYPE {}_{name} counter\n", self.prefix));
            out.push_str(&format!("{}_{name} {value}\n\n", self.prefix));
        }

        out
    }
}

// ─────────────────────────────────────────────────────────────
// Audit Logger
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ScanCycle,
    IncidentDetected,
    ActionPublished,
    ActionExecuted,
    ConfigLoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    Failure,
    BlockedBySafety,
    PendingConfirmation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetAuditEntry {
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub actor: String,
    pub kind: OperationKind,
    pub resource_id: Option<String>,
    pub outcome: OperationOutcome,
    pub duration_ms: Option<u64>,
    pub details: HashMap<String, String>,
}

/// In-memory, capacity-bounded log of operational events, queryable by
/// kind and actor. Distinct from [`fleetop_proto::ActionAudit`] — this
/// tracks the operator's own activity, not remediation outcomes.
pub struct AuditLogger {
    entries: RwLock<Vec<FleetAuditEntry>>,
    max_entries: usize,
}

impl AuditLogger {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_entries,
        }
    }

    pub fn default_capacity() -> Self {
        Self::new(10_000)
    }

    pub fn log(
        &self,
        actor: impl Into<String>,
        kind: OperationKind,
        resource_id: Option<&str>,
        outcome: OperationOutcome,
        duration_ms: Option<u64>,
        details: HashMap<String, String>,
    ) {
        let entry = FleetAuditEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor: actor.into(),
            kind,
            resource_id: resource_id.map(String::from),
            outcome,
            duration_ms,
            details,
        };

        let details_json = serde_json::to_string(&entry.details).unwrap_or_default();
        match outcome {
            OperationOutcome::Success => info!(
                audit_id = %entry.id, actor = %entry.actor, kind = ?entry.kind,
                resource_id = ?entry.resource_id, details = %details_json,
                "fleet operation succeeded"
            ),
            OperationOutcome::Failure => error!(
                audit_id = %entry.id, actor = %entry.actor, kind = ?entry.kind,
                resource_id = ?entry.resource_id, details = %details_json,
                "fleet operation failed"
            ),
            OperationOutcome::BlockedBySafety => warn!(
                audit_id = %entry.id, actor = %entry.actor, kind = ?entry.kind,
                resource_id = ?entry.resource_id, details = %details_json,
                "fleet operation blocked by safety constraint"
            ),
            OperationOutcome::PendingConfirmation => info!(
                audit_id = %entry.id, actor = %entry.actor, kind = ?entry.kind,
                resource_id = ?entry.resource_id, details = %details_json,
                "fleet operation pending operator confirmation"
            ),
        }

        let mut entries = self.entries.write();
        entries.push(entry);
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(0..excess);
        }
    }

    pub fn query(&self, kind: Option<OperationKind>, actor: Option<&str>, limit: usize) -> Vec<FleetAuditEntry> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .filter(|e| actor.is_none_or(|a| e.actor == a))
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_pipeline_events() {
        let m = OperationsMetrics::new();
        m.record_scan_cycle(2);
        m.record_anomaly();
        m.record_incident_created();
        m.record_action_published();
        m.record_action_executed(true);
        m.record_action_executed(false);

        assert_eq!(m.scan_cycles_total.get(), 1);
        assert_eq!(m.services_scanned_total.get(), 2);
        assert_eq!(m.anomalies_detected_total.get(), 1);
        assert_eq!(m.incidents_created_total.get(), 1);
        assert_eq!(m.actions_published_total.get(), 1);
        assert_eq!(m.actions_executed_success_total.get(), 1);
        assert_eq!(m.actions_executed_failure_total.get(), 1);
    }

    #[test]
    fn exporter_emits_prometheus_text_format() {
        let m = OperationsMetrics::new();
        m.record_scan_cycle(3);
        let out = MetricsExporter::new(&m).render();
        assert!(out.contains("# HELP fleetop_scan_cycles_total"));
        assert!(out.contains("# TYPE fleetop_scan_cycles_total counter"));
        assert!(out.contains("fleetop_scan_cycles_total 1"));
        assert!(out.contains("fleetop_services_scanned_total 3"));
    }

    #[test]
    fn audit_logger_query_filters_by_kind_and_actor() {
        let logger = AuditLogger::new(100);
        logger.log(
            "supervisor",
            OperationKind::IncidentDetected,
            Some("demo-app-a"),
            OperationOutcome::Success,
            Some(12),
            HashMap::new(),
        );
        logger.log(
            "fixer",
            OperationKind::ActionExecuted,
            Some("demo-app-a"),
            OperationOutcome::Failure,
            Some(800),
            HashMap::new(),
        );

        assert_eq!(logger.count(), 2);
        let by_actor = logger.query(None, Some("fixer"), 10);
        assert_eq!(by_actor.len(), 1);
        assert_eq!(by_actor[0].outcome, OperationOutcome::Failure);

        let by_kind = logger.query(Some(OperationKind::IncidentDetected), None, 10);
        assert_eq!(by_kind.len(), 1);
    }

    #[test]
    fn audit_logger_evicts_beyond_capacity() {
        let logger = AuditLogger::new(3);
        for i in 0..10 {
            logger.log(
                "system",
                OperationKind::ScanCycle,
                Some(&format!("cycle-{i}")),
                OperationOutcome::Success,
                None,
                HashMap::new(),
            );
        }
        assert_eq!(logger.count(), 3);
    }
}
