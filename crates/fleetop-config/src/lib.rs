//! Environment-driven startup configuration.
//!
//! Loaded once at process start into an immutable [`FleetConfig`]. A
//! malformed or missing `PROJECT_ID` is a fatal startup error; every other
//! variable falls back to the defaults documented on [`FleetConfig::load`].

#![forbid(unsafe_code)]

use fleetop_proto::ServiceTarget;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingRequired(&'static str),

    #[error("environment variable {0} has an invalid value: {1}")]
    InvalidValue(&'static str, String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Deadlines used throughout the scan/reason/dispatch/apply chain. Not
/// environment-overridable — these are architectural constants per the
/// concurrency model, not operator tunables.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines;

impl Deadlines {
    pub const TELEMETRY_OR_MODEL: Duration = Duration::from_secs(30);
    pub const BUS_PUBLISH: Duration = Duration::from_secs(10);
    pub const CONTROL_PLANE_OPERATION: Duration = Duration::from_secs(300);
}

/// Safety clamp bounds applied by the platform executor before any mutation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorBounds {
    pub min_instances_floor: u32,
    pub min_instances_ceiling: u32,
    pub max_instances_floor: u32,
    pub max_instances_ceiling: u32,
}

impl Default for ExecutorBounds {
    fn default() -> Self {
        Self {
            min_instances_floor: 0,
            min_instances_ceiling: 5,
            max_instances_floor: 10,
            max_instances_ceiling: 100,
        }
    }
}

/// Top-level process configuration, assembled once from the environment.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub project_id: String,
    pub region: String,
    pub error_threshold: f64,
    pub latency_p95_threshold_ms: f64,
    pub latency_p99_threshold_ms: f64,
    pub min_request_count: u64,
    pub scan_window_minutes: u64,
    pub targets: Vec<ServiceTarget>,
    pub executor_bounds: ExecutorBounds,
    pub dry_run_mode: bool,
    pub pubsub_topic: String,
    pub pubsub_subscription: String,
    pub incidents_collection: String,
    pub actions_collection: String,
    pub port: u16,
    pub telemetry_api_base_url: String,
    pub telemetry_api_key: Option<String>,
    pub model_api_base_url: String,
    pub model_api_key: Option<String>,
    pub control_plane_api_base_url: String,
    pub control_plane_api_key: Option<String>,
    pub bus_api_base_url: String,
    pub state_dir: String,
}

impl FleetConfig {
    /// Load configuration from the process environment.
    ///
    /// Required: `PROJECT_ID`. Everything else defaults per §6 of the
    /// design: `REGION=us-central1`, `ERROR_THRESHOLD=5.0`,
    /// `LATENCY_P95_THRESHOLD_MS=600`, `LATENCY_P99_THRESHOLD_MS=1000`,
    /// `MIN_REQUEST_COUNT=100`, `SCAN_WINDOW_MINUTES=5`.
    pub fn load() -> ConfigResult<Self> {
        let project_id =
            env::var("PROJECT_ID").map_err(|_| ConfigError::MissingRequired("PROJECT_ID"))?;
        let region = env::var("REGION").unwrap_or_else(|_| "us-central1".to_string());

        let error_threshold = parse_env_or("ERROR_THRESHOLD", 5.0)?;
        let latency_p95_threshold_ms = parse_env_or("LATENCY_P95_THRESHOLD_MS", 600.0)?;
        let latency_p99_threshold_ms = parse_env_or("LATENCY_P99_THRESHOLD_MS", 1000.0)?;
        let min_request_count = parse_env_or("MIN_REQUEST_COUNT", 100u64)?;
        let scan_window_minutes = parse_env_or("SCAN_WINDOW_MINUTES", 5u64)?;

        let targets = load_target_services(&region)?;

        let executor_bounds = ExecutorBounds {
            min_instances_floor: parse_env_or("MIN_INSTANCES_FLOOR", 0u32)?,
            min_instances_ceiling: parse_env_or("MIN_INSTANCES_CEILING", 5u32)?,
            max_instances_floor: parse_env_or("MAX_INSTANCES_FLOOR", 10u32)?,
            max_instances_ceiling: parse_env_or("MAX_INSTANCES_CEILING", 100u32)?,
        };

        let dry_run_mode = env::var("DRY_RUN_MODE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let pubsub_topic = env::var("PUBSUB_TOPIC").unwrap_or_else(|_| "agent-actions".to_string());
        let pubsub_subscription =
            env::var("PUBSUB_SUBSCRIPTION").unwrap_or_else(|_| "agent-actions-sub".to_string());
        let incidents_collection =
            env::var("INCIDENTS_COLLECTION").unwrap_or_else(|_| "incidents".to_string());
        let actions_collection =
            env::var("ACTIONS_COLLECTION").unwrap_or_else(|_| "actions".to_string());

        let port = parse_env_or("PORT", 8080u16)?;

        let telemetry_api_base_url = env::var("TELEMETRY_API_BASE_URL")
            .unwrap_or_else(|_| "https://monitoring.googleapis.com/v3".to_string());
        let telemetry_api_key = env::var("TELEMETRY_API_KEY").ok();
        let model_api_base_url = env::var("MODEL_API_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1".to_string());
        let model_api_key = env::var("MODEL_API_KEY").ok();
        let control_plane_api_base_url = env::var("CONTROL_PLANE_API_BASE_URL")
            .unwrap_or_else(|_| "https://run.googleapis.com/v2".to_string());
        let control_plane_api_key = env::var("CONTROL_PLANE_API_KEY").ok();
        let bus_api_base_url = env::var("BUS_API_BASE_URL")
            .unwrap_or_else(|_| "https://pubsub.googleapis.com/v1".to_string());
        let state_dir = env::var("STATE_DIR").unwrap_or_else(|_| "/var/lib/fleetop".to_string());

        if dry_run_mode {
            warn!("DRY_RUN_MODE enabled — no control-plane mutations will be applied");
        }

        Ok(Self {
            project_id,
            region,
            error_threshold,
            latency_p95_threshold_ms,
            latency_p99_threshold_ms,
            min_request_count,
            scan_window_minutes,
            targets,
            executor_bounds,
            dry_run_mode,
            pubsub_topic,
            pubsub_subscription,
            incidents_collection,
            actions_collection,
            port,
            telemetry_api_base_url,
            telemetry_api_key,
            model_api_base_url,
            model_api_key,
            control_plane_api_base_url,
            control_plane_api_key,
            bus_api_base_url,
            state_dir,
        })
    }
}

fn parse_env_or<T>(key: &'static str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        Err(_) => Ok(default),
    }
}

/// `TARGET_SERVICES_JSON` (preferred, a JSON array of `{name, region}`) or
/// `TARGET_SERVICES` (comma-separated names, region = default) or, absent
/// both, the two-service default matching the original deployment.
fn load_target_services(default_region: &str) -> ConfigResult<Vec<ServiceTarget>> {
    if let Ok(raw) = env::var("TARGET_SERVICES_JSON") {
        #[derive(serde::Deserialize)]
        struct RawTarget {
            name: String,
            region: String,
        }
        match serde_json::from_str::<Vec<RawTarget>>(&raw) {
            Ok(parsed) => {
                return Ok(parsed
                    .into_iter()
                    .map(|t| ServiceTarget::new(t.name, t.region))
                    .collect());
            }
            Err(e) => {
                warn!(error = %e, "invalid TARGET_SERVICES_JSON, falling back");
            }
        }
    }

    if let Ok(raw) = env::var("TARGET_SERVICES") {
        let names: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        if !names.is_empty() {
            return Ok(names
                .into_iter()
                .map(|name| ServiceTarget::new(name, default_region))
                .collect());
        }
    }

    Ok(vec![
        ServiceTarget::new("demo-app-a", default_region),
        ServiceTarget::new("demo-app-b", default_region),
    ])
}
