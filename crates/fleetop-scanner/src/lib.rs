//! Health Scanner.
//!
//! Reduces a window of telemetry and error logs for one service into a
//! [`ServiceHealth`] assessment. The scan contract never fails: transport
//! errors on any individual signal collapse to a zeroed value and a warning,
//! not a propagated error, so a flaky telemetry backend degrades scan
//! quality instead of stalling the loop.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleetop_proto::{HealthMetrics, LogSample, ServiceHealth, ServiceStatus, ServiceTarget};
use std::time::Duration;
use tracing::warn;

/// A window-aligned telemetry and log read, abstracted over the concrete
/// monitoring backend. Every method is independently fallible; the scanner
/// treats any error as "no signal" rather than a scan failure.
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    async fn request_count(&self, service: &str, region: &str, window: Window) -> anyhow::Result<u64>;
    async fn error_count(&self, service: &str, region: &str, window: Window) -> anyhow::Result<u64>;
    async fn p95_latency_ms(&self, service: &str, region: &str, window: Window) -> anyhow::Result<Option<f64>>;
    async fn error_logs(&self, service: &str, region: &str, window: Window) -> anyhow::Result<Vec<LogSample>>;
}

/// A 60-second-bucket-aligned query window.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn trailing(minutes: u64) -> Self {
        let end = Utc::now();
        let start = end - ChronoDuration::minutes(minutes as i64);
        Self { start, end }
    }
}

/// Thresholds the scanner applies when a [`ServiceTarget`] doesn't override
/// them itself.
#[derive(Debug, Clone, Copy)]
pub struct ScanThresholds {
    pub error_threshold: f64,
    pub latency_p95_threshold_ms: f64,
    pub min_request_count: u64,
    pub scan_window_minutes: u64,
}

pub const MAX_LOG_SAMPLES: usize = 50;

pub struct HealthScanner<B: TelemetryBackend> {
    backend: B,
    defaults: ScanThresholds,
}

impl<B: TelemetryBackend> HealthScanner<B> {
    pub fn new(backend: B, defaults: ScanThresholds) -> Self {
        Self { backend, defaults }
    }

    /// Scan one target. Never returns `Err`; a total telemetry outage
    /// surfaces as `ServiceStatus::Unknown` with zeroed metrics.
    pub async fn scan(&self, target: &ServiceTarget) -> ServiceHealth {
        let window = Window::trailing(self.defaults.scan_window_minutes);

        let (request_count, error_count, p95, mut logs) = tokio::join!(
            self.safe_request_count(target, window),
            self.safe_error_count(target, window),
            self.safe_p95(target, window),
            self.safe_logs(target, window),
        );

        let transport_down = request_count.is_none() && error_count.is_none();

        let metrics = HealthMetrics::new(request_count.unwrap_or(0), error_count.unwrap_or(0), p95);

        logs.truncate(MAX_LOG_SAMPLES);

        if transport_down {
            return ServiceHealth {
                service: target.name.clone(),
                region: target.region.clone(),
                status: ServiceStatus::Unknown,
                metrics,
                log_samples: logs,
                has_anomaly: false,
                anomaly_summary: None,
            };
        }

        self.classify(target, metrics, logs)
    }

    fn classify(&self, target: &ServiceTarget, metrics: HealthMetrics, logs: Vec<LogSample>) -> ServiceHealth {
        let min_request_count = target.min_request_count.unwrap_or(self.defaults.min_request_count);

        if metrics.request_count < min_request_count {
            return ServiceHealth {
                service: target.name.clone(),
                region: target.region.clone(),
                status: ServiceStatus::Healthy,
                metrics,
                log_samples: logs,
                has_anomaly: false,
                anomaly_summary: None,
            };
        }

        let error_threshold = target.error_threshold.unwrap_or(self.defaults.error_threshold);
        let latency_threshold = target
            .latency_p95_threshold_ms
            .unwrap_or(self.defaults.latency_p95_threshold_ms);

        let mut violations = Vec::new();
        if metrics.error_rate > error_threshold {
            violations.push("high error rate".to_string());
        }
        if let Some(p95) = metrics.latency_p95_ms {
            if p95 > latency_threshold {
                violations.push("high latency".to_string());
            }
        }

        let status = ServiceStatus::from_violation_count(violations.len());
        let anomaly_summary = if violations.is_empty() {
            None
        } else {
            Some(violations.join("; "))
        };

        ServiceHealth {
            service: target.name.clone(),
            region: target.region.clone(),
            status,
            has_anomaly: status.has_anomaly(),
            metrics,
            log_samples: logs,
            anomaly_summary,
        }
    }

    async fn safe_request_count(&self, target: &ServiceTarget, window: Window) -> Option<u64> {
        match self.backend.request_count(&target.name, &target.region, window).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(service = %target.name, signal = "request_count", error = %e, "telemetry signal unavailable");
                None
            }
        }
    }

    async fn safe_error_count(&self, target: &ServiceTarget, window: Window) -> Option<u64> {
        match self.backend.error_count(&target.name, &target.region, window).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(service = %target.name, signal = "error_count", error = %e, "telemetry signal unavailable");
                None
            }
        }
    }

    async fn safe_p95(&self, target: &ServiceTarget, window: Window) -> Option<f64> {
        match self.backend.p95_latency_ms(&target.name, &target.region, window).await {
            Ok(v) => v,
            Err(e) => {
                warn!(service = %target.name, signal = "p95_latency_ms", error = %e, "telemetry signal unavailable");
                None
            }
        }
    }

    async fn safe_logs(&self, target: &ServiceTarget, window: Window) -> Vec<LogSample> {
        match self.backend.error_logs(&target.name, &target.region, window).await {
            Ok(v) => v,
            Err(e) => {
                warn!(service = %target.name, signal = "error_logs", error = %e, "log query unavailable");
                Vec::new()
            }
        }
    }
}

impl Default for ScanThresholds {
    fn default() -> Self {
        Self {
            error_threshold: 5.0,
            latency_p95_threshold_ms: 600.0,
            min_request_count: 100,
            scan_window_minutes: 5,
        }
    }
}

/// A fixed-response backend for tests and local dry runs.
#[derive(Debug, Clone, Default)]
pub struct FakeTelemetry {
    pub request_count: u64,
    pub error_count: u64,
    pub p95_latency_ms: Option<f64>,
    pub logs: Vec<LogSample>,
    pub fail: bool,
}

#[async_trait]
impl TelemetryBackend for FakeTelemetry {
    async fn request_count(&self, _service: &str, _region: &str, _window: Window) -> anyhow::Result<u64> {
        if self.fail {
            anyhow::bail!("telemetry backend unreachable");
        }
        Ok(self.request_count)
    }

    async fn error_count(&self, _service: &str, _region: &str, _window: Window) -> anyhow::Result<u64> {
        if self.fail {
            anyhow::bail!("telemetry backend unreachable");
        }
        Ok(self.error_count)
    }

    async fn p95_latency_ms(&self, _service: &str, _region: &str, _window: Window) -> anyhow::Result<Option<f64>> {
        if self.fail {
            anyhow::bail!("telemetry backend unreachable");
        }
        Ok(self.p95_latency_ms)
    }

    async fn error_logs(&self, _service: &str, _region: &str, _window: Window) -> anyhow::Result<Vec<LogSample>> {
        if self.fail {
            anyhow::bail!("telemetry backend unreachable");
        }
        Ok(self.logs.clone())
    }
}

/// Bound on a failure cascade — used by integration tests that inject a
/// global timeout around the scan, matching the per-call backend timeout
/// real deployments wrap each telemetry call in.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(30);
