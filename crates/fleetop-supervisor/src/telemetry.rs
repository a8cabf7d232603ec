//! HTTP-backed [`TelemetryBackend`] implementation against a Cloud
//! Monitoring / Cloud Logging-shaped REST API.

use fleetop_proto::LogSample;
use fleetop_scanner::{TelemetryBackend, Window};
use serde::Deserialize;
use std::time::Duration;

pub struct HttpTelemetryBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    project_id: String,
}

impl HttpTelemetryBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, project_id: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            base_url: base_url.into(),
            api_key,
            project_id: project_id.into(),
        }
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn query_aligned_sum(&self, metric_type: &str, filter_extra: &str, window: Window) -> anyhow::Result<f64> {
        let url = format!("{}/projects/{}/timeSeries", self.base_url, self.project_id);
        let filter = format!(r#"metric.type="{metric_type}" {filter_extra}"#);
        let resp = self
            .with_auth(self.client.get(&url))
            .query(&[
                ("filter", filter.as_str()),
                ("interval.startTime", &window.start.to_rfc3339()),
                ("interval.endTime", &window.end.to_rfc3339()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<TimeSeriesListResponse>()
            .await?;

        let total: f64 = resp
            .time_series
            .into_iter()
            .flat_map(|ts| ts.points)
            .filter_map(|p| p.value.as_numeric())
            .sum();
        Ok(total)
    }

    async fn query_aligned_latest(&self, metric_type: &str, filter_extra: &str, window: Window) -> anyhow::Result<Option<f64>> {
        let url = format!("{}/projects/{}/timeSeries", self.base_url, self.project_id);
        let filter = format!(r#"metric.type="{metric_type}" {filter_extra}"#);
        let resp = self
            .with_auth(self.client.get(&url))
            .query(&[
                ("filter", filter.as_str()),
                ("interval.startTime", &window.start.to_rfc3339()),
                ("interval.endTime", &window.end.to_rfc3339()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<TimeSeriesListResponse>()
            .await?;

        Ok(resp
            .time_series
            .into_iter()
            .flat_map(|ts| ts.points)
            .filter_map(|p| p.value.as_numeric())
            .last())
    }
}

#[async_trait::async_trait]
impl TelemetryBackend for HttpTelemetryBackend {
    async fn request_count(&self, service: &str, _region: &str, window: Window) -> anyhow::Result<u64> {
        let filter = format!(r#"AND resource.labels.service_name="{service}""#);
        let total = self.query_aligned_sum("run.googleapis.com/request_count", &filter, window).await?;
        Ok(total.round().max(0.0) as u64)
    }

    async fn error_count(&self, service: &str, _region: &str, window: Window) -> anyhow::Result<u64> {
        let filter = format!(
            r#"AND resource.labels.service_name="{service}" AND metric.labels.response_code_class="5xx""#
        );
        let total = self.query_aligned_sum("run.googleapis.com/request_count", &filter, window).await?;
        Ok(total.round().max(0.0) as u64)
    }

    async fn p95_latency_ms(&self, service: &str, _region: &str, window: Window) -> anyhow::Result<Option<f64>> {
        let filter = format!(r#"AND resource.labels.service_name="{service}""#);
        self.query_aligned_latest("run.googleapis.com/request_latencies", &filter, window).await
    }

    async fn error_logs(&self, service: &str, _region: &str, window: Window) -> anyhow::Result<Vec<LogSample>> {
        let url = format!("{}/entries:list", self.base_url);
        let filter = format!(
            r#"resource.labels.service_name="{service}" AND severity>=ERROR AND timestamp>="{}" AND timestamp<="{}""#,
            window.start.to_rfc3339(),
            window.end.to_rfc3339()
        );
        let body = serde_json::json!({
            "resourceNames": [format!("projects/{}", self.project_id)],
            "filter": filter,
            "orderBy": "timestamp desc",
            "pageSize": 50,
        });
        let resp = self
            .with_auth(self.client.post(&url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<LogEntriesListResponse>()
            .await?;

        Ok(resp
            .entries
            .into_iter()
            .map(|e| LogSample::new(e.severity.unwrap_or_else(|| "ERROR".to_string()), e.text_payload.unwrap_or_default()))
            .collect())
    }
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
}

#[derive(Debug, Deserialize, Default)]
struct TimeSeriesListResponse {
    #[serde(rename = "timeSeries", default)]
    time_series: Vec<TimeSeriesResource>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResource {
    #[serde(default)]
    points: Vec<PointResource>,
}

#[derive(Debug, Deserialize)]
struct PointResource {
    value: PointValue,
}

#[derive(Debug, Deserialize)]
struct PointValue {
    #[serde(rename = "int64Value")]
    int64_value: Option<String>,
    #[serde(rename = "doubleValue")]
    double_value: Option<f64>,
}

impl PointValue {
    fn as_numeric(&self) -> Option<f64> {
        if let Some(d) = self.double_value {
            return Some(d);
        }
        self.int64_value.as_ref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize, Default)]
struct LogEntriesListResponse {
    #[serde(default)]
    entries: Vec<LogEntryResource>,
}

#[derive(Debug, Deserialize)]
struct LogEntryResource {
    severity: Option<String>,
    #[serde(rename = "textPayload")]
    text_payload: Option<String>,
}
