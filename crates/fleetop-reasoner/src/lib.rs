//! Reasoner.
//!
//! Turns a [`ServiceHealth`] assessment plus the platform facts the caller
//! already fetched into a structured [`Recommendation`]. The generative
//! model is an external service reached through [`GenerativeModel`]; every
//! failure mode — timeout, malformed JSON, upstream error — collapses to a
//! safe `NONE` recommendation rather than propagating to the caller.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use fleetop_proto::{ActionType, Recommendation, ScaleParams, ServiceHealth};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Single-turn text generation, abstracted over the concrete model backend.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str, max_output_tokens: u32, temperature: f64) -> anyhow::Result<String>;
}

/// Cloud-Run-shaped revision facts the caller fetches from the control
/// plane before invoking the reasoner. Kept separate from the Reasoner
/// itself so this crate never needs a platform client dependency.
#[derive(Debug, Clone, Default)]
pub struct PlatformFacts {
    pub current_revision: Option<String>,
    pub traffic_split: HashMap<String, u32>,
    pub available_revisions: Vec<String>,
}

impl PlatformFacts {
    /// The most-recent revision receiving non-zero traffic that is not the
    /// latest revision, else the second entry of `available_revisions`
    /// (assumed chronologically sorted, newest first) when one exists.
    pub fn previous_stable_revision(&self) -> Option<String> {
        if let Some(current) = &self.current_revision {
            let mut candidates: Vec<&String> = self
                .traffic_split
                .iter()
                .filter(|(rev, pct)| **pct > 0 && *rev != current)
                .map(|(rev, _)| rev)
                .collect();
            candidates.sort();
            if let Some(rev) = candidates.first() {
                return Some((*rev).clone());
            }
        }
        self.available_revisions.get(1).cloned()
    }
}

const MAX_OUTPUT_TOKENS: u32 = 2048;
const TEMPERATURE: f64 = 0.2;
const MAX_PROMPT_LOGS: usize = 5;
const MAX_PROMPT_LOG_MESSAGE_LEN: usize = 200;
const MAX_PROMPT_REVISIONS: usize = 10;

pub const EXPLANATION_FALLBACK: &str =
    "Automated explanation unavailable; the reasoning service could not be reached.";

pub struct Reasoner<M: GenerativeModel> {
    model: M,
    timeout: Duration,
}

impl<M: GenerativeModel> Reasoner<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total function: a model timeout, transport error, or unparsable
    /// response all yield `Recommendation::none_default`, never an `Err`.
    pub async fn recommend(&self, health: &ServiceHealth, facts: &PlatformFacts) -> Recommendation {
        let prompt = Self::build_prompt(health, facts);

        let call = self.model.generate(&prompt, MAX_OUTPUT_TOKENS, TEMPERATURE);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(service = %health.service, error = %e, "reasoner model call failed");
                return Recommendation::none_default(format!("Analysis failed: {e}"));
            }
            Err(_) => {
                warn!(service = %health.service, "reasoner model call timed out");
                return Recommendation::none_default("Analysis failed: model call timed out");
            }
        };

        let recommendation = Self::parse_response(&response, facts);
        info!(
            service = %health.service,
            action = %recommendation.action,
            confidence = recommendation.confidence,
            "reasoner produced recommendation"
        );
        recommendation
    }

    /// A second, independent model call producing a short post-incident
    /// summary. Never propagates an error — any failure yields
    /// [`EXPLANATION_FALLBACK`].
    pub async fn generate_explanation(&self, incident_summary: &str) -> String {
        let prompt = format!(
            "Summarize this incident and its resolution for an on-call engineer in 2-3 sentences, plain text, no markdown:\n\n{incident_summary}"
        );
        let call = self.model.generate(&prompt, 512, TEMPERATURE);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) => text.trim().to_string(),
            Ok(Err(e)) => {
                warn!(error = %e, "explanation model call failed");
                EXPLANATION_FALLBACK.to_string()
            }
            Err(_) => {
                warn!("explanation model call timed out");
                EXPLANATION_FALLBACK.to_string()
            }
        }
    }

    fn build_prompt(health: &ServiceHealth, facts: &PlatformFacts) -> String {
        let log_summary = health
            .log_samples
            .iter()
            .take(MAX_PROMPT_LOGS)
            .map(|log| {
                let msg: String = log.message.chars().take(MAX_PROMPT_LOG_MESSAGE_LEN).collect();
                format!("[{}] {}", log.severity, msg)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let revisions = facts
            .available_revisions
            .iter()
            .take(MAX_PROMPT_REVISIONS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "You are an expert Site Reliability Engineer analyzing a managed container service health issue.\n\n\
SERVICE INFORMATION:\n\
- Service Name: {service}\n\
- Region: {region}\n\
- Current Status: {status}\n\n\
METRICS (recent window):\n\
- Error Rate: {error_rate:.2}%\n\
- Request Count: {request_count}\n\
- Failed Requests: {error_count}\n\
- Successful Requests: {success_count}\n\
- Latency P95: {p95}\n\n\
REVISION INFORMATION:\n\
- Current Revision: {current_revision}\n\
- Traffic Split: {traffic_split:?}\n\
- Available Revisions: {revisions}\n\
- Previous Stable Revision: {previous_revision}\n\n\
RECENT ERROR LOGS:\n\
{log_summary}\n\n\
ANOMALY DETECTED:\n\
{anomaly_summary}\n\n\
AVAILABLE ACTIONS:\n\
1. ROLLBACK - route all traffic to the previous stable revision\n\
2. SCALE_UP - increase min/max instance counts\n\
3. SCALE_DOWN - decrease instance counts (if over-provisioned)\n\
4. REDEPLOY - trigger a new build and deployment\n\
5. NONE - take no action (not serious enough)\n\n\
Respond in this EXACT JSON format:\n\
{{\n\
  \"action\": \"ROLLBACK|SCALE_UP|SCALE_DOWN|REDEPLOY|NONE\",\n\
  \"confidence\": 0.0-1.0,\n\
  \"reasoning\": \"brief explanation\",\n\
  \"risk_assessment\": \"what could go wrong\",\n\
  \"expected_impact\": \"what should happen after this action\",\n\
  \"root_cause_hypothesis\": \"your best guess at the cause\"\n\
}}\n\n\
Be decisive but conservative. If uncertain, choose NONE.",
            service = health.service,
            region = health.region,
            status = health.status,
            error_rate = health.metrics.error_rate,
            request_count = health.metrics.request_count,
            error_count = health.metrics.error_count,
            success_count = health.metrics.success_count(),
            p95 = health
                .metrics
                .latency_p95_ms
                .map(|v| format!("{v}ms"))
                .unwrap_or_else(|| "unknown".to_string()),
            current_revision = facts.current_revision.as_deref().unwrap_or("unknown"),
            traffic_split = facts.traffic_split,
            revisions = revisions,
            previous_revision = facts.previous_stable_revision().unwrap_or_else(|| "unknown".to_string()),
            log_summary = if log_summary.is_empty() { "No recent error logs".to_string() } else { log_summary },
            anomaly_summary = health.anomaly_summary.as_deref().unwrap_or("none"),
        )
    }

    fn parse_response(raw: &str, facts: &PlatformFacts) -> Recommendation {
        let stripped = strip_fences(raw);

        #[derive(Deserialize)]
        struct RawRecommendation {
            #[serde(default)]
            action: String,
            #[serde(default)]
            confidence: f64,
            #[serde(default)]
            reasoning: String,
            #[serde(default)]
            risk_assessment: String,
            #[serde(default)]
            expected_impact: String,
            #[serde(default)]
            root_cause_hypothesis: Option<String>,
        }

        let parsed: RawRecommendation = match serde_json::from_str(&stripped) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, raw = %raw, "failed to parse reasoner response");
                return Recommendation::none_default(format!("Failed to parse recommendation: {e}"));
            }
        };

        let action = ActionType::from_loose_str(&parsed.action);

        let target_revision = if action == ActionType::Rollback {
            facts.previous_stable_revision()
        } else {
            None
        };

        let mut recommendation = Recommendation {
            action,
            confidence: parsed.confidence,
            reasoning: if parsed.reasoning.is_empty() {
                "No reasoning provided".to_string()
            } else {
                parsed.reasoning
            },
            risk_assessment: if parsed.risk_assessment.is_empty() {
                "Unknown risk".to_string()
            } else {
                parsed.risk_assessment
            },
            expected_impact: if parsed.expected_impact.is_empty() {
                "Unknown impact".to_string()
            } else {
                parsed.expected_impact
            },
            target_revision,
            scale_params: None,
            root_cause_hypothesis: parsed.root_cause_hypothesis,
        };
        recommendation.clamp_confidence();
        recommendation.enforce_invariants()
    }
}

/// Strip a leading/trailing ```json or ``` fenced code block, if present.
fn strip_fences(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim().to_string()
}

/// Attaches `scale_params` to a recommendation already produced by
/// [`Reasoner::recommend`] when the caller derives them out-of-band (the
/// model prompt does not ask for numeric bounds, only the action). Returns
/// the recommendation re-validated through `enforce_invariants`.
pub fn with_scale_params(mut recommendation: Recommendation, params: ScaleParams) -> Recommendation {
    recommendation.scale_params = Some(params);
    recommendation.enforce_invariants()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetop_proto::{HealthMetrics, ServiceStatus};

    struct FixedModel {
        response: String,
    }

    #[async_trait]
    impl GenerativeModel for FixedModel {
        async fn generate(&self, _prompt: &str, _max_tokens: u32, _temp: f64) -> anyhow::Result<String> {
            Ok(self.response.clone())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl GenerativeModel for FailingModel {
        async fn generate(&self, _prompt: &str, _max_tokens: u32, _temp: f64) -> anyhow::Result<String> {
            anyhow::bail!("upstream unavailable")
        }
    }

    struct SlowModel;

    #[async_trait]
    impl GenerativeModel for SlowModel {
        async fn generate(&self, _prompt: &str, _max_tokens: u32, _temp: f64) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok("{}".to_string())
        }
    }

    fn health() -> ServiceHealth {
        ServiceHealth {
            service: "demo-app-a".to_string(),
            region: "us-central1".to_string(),
            status: ServiceStatus::Unhealthy,
            metrics: HealthMetrics::new(1000, 150, Some(1200.0)),
            log_samples: vec![],
            has_anomaly: true,
            anomaly_summary: Some("high error rate; high latency".to_string()),
        }
    }

    fn facts_with_history() -> PlatformFacts {
        let mut traffic_split = HashMap::new();
        traffic_split.insert("demo-app-a-00002-xyz".to_string(), 100);
        PlatformFacts {
            current_revision: Some("demo-app-a-00003-abc".to_string()),
            traffic_split,
            available_revisions: vec![
                "demo-app-a-00003-abc".to_string(),
                "demo-app-a-00002-xyz".to_string(),
            ],
        }
    }

    #[tokio::test]
    async fn rollback_recommendation_gets_previous_revision_injected() {
        let model = FixedModel {
            response: r#"```json
{"action": "ROLLBACK", "confidence": 0.9, "reasoning": "regression after deploy", "risk_assessment": "brief traffic blip", "expected_impact": "error rate drops", "root_cause_hypothesis": "bad deploy"}
```"#
                .to_string(),
        };
        let reasoner = Reasoner::new(model);
        let rec = reasoner.recommend(&health(), &facts_with_history()).await;
        assert_eq!(rec.action, ActionType::Rollback);
        assert_eq!(rec.target_revision.as_deref(), Some("demo-app-a-00002-xyz"));
        assert_eq!(rec.confidence, 0.9);
    }

    #[tokio::test]
    async fn rollback_without_resolvable_previous_revision_downgrades_to_none() {
        let model = FixedModel {
            response: r#"{"action": "ROLLBACK", "confidence": 0.9, "reasoning": "x", "risk_assessment": "y", "expected_impact": "z"}"#
                .to_string(),
        };
        let reasoner = Reasoner::new(model);
        let rec = reasoner.recommend(&health(), &PlatformFacts::default()).await;
        assert_eq!(rec.action, ActionType::None);
        assert_eq!(rec.confidence, 0.0);
    }

    #[tokio::test]
    async fn malformed_json_yields_safe_default() {
        let model = FixedModel {
            response: "not json at all".to_string(),
        };
        let reasoner = Reasoner::new(model);
        let rec = reasoner.recommend(&health(), &facts_with_history()).await;
        assert_eq!(rec.action, ActionType::None);
        assert_eq!(rec.confidence, 0.0);
    }

    #[tokio::test]
    async fn unknown_action_name_collapses_to_none() {
        let model = FixedModel {
            response: r#"{"action": "REBOOT_EVERYTHING", "confidence": 0.5, "reasoning": "x", "risk_assessment": "y", "expected_impact": "z"}"#
                .to_string(),
        };
        let reasoner = Reasoner::new(model);
        let rec = reasoner.recommend(&health(), &facts_with_history()).await;
        assert_eq!(rec.action, ActionType::None);
    }

    #[tokio::test]
    async fn confidence_above_one_is_clamped() {
        let model = FixedModel {
            response: r#"{"action": "NONE", "confidence": 3.5, "reasoning": "x", "risk_assessment": "y", "expected_impact": "z"}"#
                .to_string(),
        };
        let reasoner = Reasoner::new(model);
        let rec = reasoner.recommend(&health(), &facts_with_history()).await;
        assert_eq!(rec.confidence, 1.0);
    }

    #[tokio::test]
    async fn upstream_error_is_never_propagated() {
        let reasoner = Reasoner::new(FailingModel);
        let rec = reasoner.recommend(&health(), &facts_with_history()).await;
        assert_eq!(rec.action, ActionType::None);
        assert!(rec.reasoning.contains("upstream unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn model_timeout_is_never_propagated() {
        let reasoner = Reasoner::new(SlowModel).with_timeout(Duration::from_millis(50));
        let rec = reasoner.recommend(&health(), &facts_with_history()).await;
        assert_eq!(rec.action, ActionType::None);
        assert!(rec.reasoning.contains("timed out"));
    }

    #[tokio::test]
    async fn explanation_falls_back_on_model_failure() {
        let reasoner = Reasoner::new(FailingModel);
        let explanation = reasoner.generate_explanation("incident summary").await;
        assert_eq!(explanation, EXPLANATION_FALLBACK);
    }

    #[tokio::test]
    async fn explanation_returns_trimmed_model_output_on_success() {
        let model = FixedModel {
            response: "  Service recovered after rollback.  ".to_string(),
        };
        let reasoner = Reasoner::new(model);
        let explanation = reasoner.generate_explanation("incident summary").await;
        assert_eq!(explanation, "Service recovered after rollback.");
    }

    #[test]
    fn previous_stable_revision_prefers_nonzero_traffic_not_current() {
        let facts = facts_with_history();
        assert_eq!(
            facts.previous_stable_revision().as_deref(),
            Some("demo-app-a-00002-xyz")
        );
    }

    #[test]
    fn previous_stable_revision_falls_back_to_second_available() {
        let facts = PlatformFacts {
            current_revision: None,
            traffic_split: HashMap::new(),
            available_revisions: vec!["rev-a".to_string(), "rev-b".to_string()],
        };
        assert_eq!(facts.previous_stable_revision().as_deref(), Some("rev-b"));
    }
}
