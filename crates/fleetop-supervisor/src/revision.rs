//! Read-only revision/traffic facts fetched from the control plane before
//! invoking the Reasoner. Distinct from `fleetop-executor`'s `ControlPlane`
//! trait, which the Fixer uses to *mutate* the same API — the Supervisor
//! only ever reads.

use fleetop_reasoner::PlatformFacts;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub struct RevisionInfoClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    project_id: String,
}

impl RevisionInfoClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, project_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
            api_key,
            project_id: project_id.into(),
        }
    }

    pub async fn fetch(&self, service: &str, region: &str) -> anyhow::Result<PlatformFacts> {
        let service_url = format!(
            "{}/projects/{}/locations/{}/services/{}",
            self.base_url, self.project_id, region, service
        );
        let mut builder = self.client.get(&service_url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let service_resource: ServiceResource = builder.send().await?.error_for_status()?.json().await?;

        let traffic_split: HashMap<String, u32> = service_resource
            .traffic
            .into_iter()
            .filter_map(|t| Some((t.revision?, t.percent.unwrap_or(0))))
            .collect();

        let revisions_url = format!(
            "{}/projects/{}/locations/{}/services/{}/revisions",
            self.base_url, self.project_id, region, service
        );
        let mut builder = self.client.get(&revisions_url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let revisions_resource: RevisionsListResource =
            builder.send().await?.error_for_status()?.json().await.unwrap_or_default();

        let available_revisions = revisions_resource.revisions.into_iter().map(|r| r.name).collect();

        Ok(PlatformFacts {
            current_revision: service_resource.latest_ready_revision,
            traffic_split,
            available_revisions,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServiceResource {
    #[serde(default)]
    latest_ready_revision: Option<String>,
    #[serde(default)]
    traffic: Vec<TrafficTargetResource>,
}

#[derive(Debug, Deserialize)]
struct TrafficTargetResource {
    revision: Option<String>,
    percent: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionsListResource {
    #[serde(default)]
    revisions: Vec<RevisionResource>,
}

#[derive(Debug, Deserialize)]
struct RevisionResource {
    name: String,
}
