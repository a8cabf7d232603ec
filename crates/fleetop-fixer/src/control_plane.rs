//! HTTP-backed [`ControlPlane`] implementation against a Cloud-Run-shaped
//! REST API: `GET`/`PATCH` on the service resource, with `updateMask`
//! scoping the patch to the field the caller is mutating.

use fleetop_executor::{ControlPlane, ExecutorError, ExecutorResult, ScalingState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    project_id: String,
}

impl HttpControlPlane {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, project_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(305))
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
            api_key,
            project_id: project_id.into(),
        }
    }

    fn service_url(&self, service: &str, region: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/services/{}",
            self.base_url, self.project_id, region, service
        )
    }

    async fn fetch_service(&self, service: &str, region: &str) -> ExecutorResult<ServiceResource> {
        let mut builder = self.client.get(self.service_url(service, region));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ExecutorError::Backend(e.into()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ExecutorError::NotFound {
                service: service.to_string(),
                region: region.to_string(),
            });
        }

        response
            .error_for_status()
            .map_err(|e| ExecutorError::Backend(e.into()))?
            .json()
            .await
            .map_err(|e| ExecutorError::Backend(e.into()))
    }

    async fn patch_service(&self, service: &str, region: &str, body: &serde_json::Value, update_mask: &str) -> ExecutorResult<(ServiceResource, String)> {
        let mut builder = self
            .client
            .patch(self.service_url(service, region))
            .query(&[("updateMask", update_mask)]);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ExecutorError::Backend(e.into()))?
            .error_for_status()
            .map_err(|e| ExecutorError::Backend(e.into()))?;

        let operation: OperationResource = response.json().await.map_err(|e| ExecutorError::Backend(e.into()))?;
        let updated = operation.response.unwrap_or_default();
        Ok((updated, operation.name))
    }
}

#[async_trait::async_trait]
impl ControlPlane for HttpControlPlane {
    async fn current_traffic(&self, service: &str, region: &str) -> ExecutorResult<HashMap<String, u32>> {
        let resource = self.fetch_service(service, region).await?;
        Ok(traffic_map(&resource))
    }

    async fn list_revisions(&self, service: &str, region: &str) -> ExecutorResult<Vec<String>> {
        let url = format!(
            "{}/projects/{}/locations/{}/services/{}/revisions",
            self.base_url, self.project_id, region, service
        );
        let mut builder = self.client.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ExecutorError::Backend(e.into()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ExecutorError::NotFound {
                service: service.to_string(),
                region: region.to_string(),
            });
        }

        let resource: RevisionsListResource = response
            .error_for_status()
            .map_err(|e| ExecutorError::Backend(e.into()))?
            .json()
            .await
            .map_err(|e| ExecutorError::Backend(e.into()))?;

        Ok(resource.revisions.into_iter().map(|r| r.name).collect())
    }

    async fn current_scaling(&self, service: &str, region: &str) -> ExecutorResult<ScalingState> {
        let resource = self.fetch_service(service, region).await?;
        Ok(scaling_state(&resource))
    }

    async fn apply_traffic(
        &self,
        service: &str,
        region: &str,
        target_revision: &str,
        percentage: u32,
    ) -> ExecutorResult<(HashMap<String, u32>, String)> {
        let body = serde_json::json!({
            "traffic": [{ "revision": target_revision, "percent": percentage, "type": "TRAFFIC_TARGET_ALLOCATION_TYPE_REVISION" }]
        });
        let (resource, operation_id) = self.patch_service(service, region, &body, "traffic").await?;
        Ok((traffic_map(&resource), operation_id))
    }

    async fn apply_scaling(
        &self,
        service: &str,
        region: &str,
        min_instances: u32,
        max_instances: u32,
    ) -> ExecutorResult<((u32, u32), String)> {
        let body = serde_json::json!({
            "template": { "scaling": { "minInstanceCount": min_instances, "maxInstanceCount": max_instances } }
        });
        let (resource, operation_id) = self.patch_service(service, region, &body, "template.scaling").await?;
        let scaling = scaling_state(&resource);
        Ok(((scaling.min_instances, scaling.max_instances), operation_id))
    }
}

fn traffic_map(resource: &ServiceResource) -> HashMap<String, u32> {
    resource
        .traffic
        .iter()
        .filter_map(|t| Some((t.revision.clone()?, t.percent.unwrap_or(0))))
        .collect()
}

fn scaling_state(resource: &ServiceResource) -> ScalingState {
    let scaling = resource.template.as_ref().and_then(|t| t.scaling.as_ref());
    ScalingState {
        min_instances: scaling.and_then(|s| s.min_instance_count).unwrap_or(0),
        max_instances: scaling.and_then(|s| s.max_instance_count).unwrap_or(100),
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServiceResource {
    #[serde(default)]
    traffic: Vec<TrafficTargetResource>,
    #[serde(default)]
    template: Option<TemplateResource>,
}

#[derive(Debug, Deserialize, Serialize)]
struct TrafficTargetResource {
    revision: Option<String>,
    percent: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateResource {
    #[serde(default)]
    scaling: Option<ScalingResource>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScalingResource {
    min_instance_count: Option<u32>,
    max_instance_count: Option<u32>,
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

#[derive(Debug, Deserialize)]
struct OperationResource {
    name: String,
    #[serde(default)]
    response: Option<ServiceResource>,
}
