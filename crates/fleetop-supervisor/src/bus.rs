//! HTTP-backed [`BusTransport`] implementation against a Pub/Sub-shaped
//! REST API: base64-encode the payload and POST to `{topic}:publish`.

use base64::Engine;
use fleetop_dispatcher::BusTransport;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub struct HttpBusTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    project_id: String,
    topic: String,
}

impl HttpBusTransport {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, project_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
            api_key,
            project_id: project_id.into(),
            topic: topic.into(),
        }
    }
}

#[async_trait::async_trait]
impl BusTransport for HttpBusTransport {
    async fn publish_once(&self, payload: &[u8], attributes: &HashMap<String, String>) -> anyhow::Result<String> {
        let url = format!(
            "{}/projects/{}/topics/{}:publish",
            self.base_url, self.project_id, self.topic
        );
        let body = serde_json::json!({
            "messages": [{
                "data": base64::engine::general_purpose::STANDARD.encode(payload),
                "attributes": attributes,
            }]
        });

        let mut builder = self.client.post(&url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response: PublishResponse = builder.json(&body).send().await?.error_for_status()?.json().await?;

        response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("bus publish response contained no message ids"))
    }
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    message_ids: Vec<String>,
}
