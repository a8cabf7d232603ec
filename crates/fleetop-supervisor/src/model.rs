//! HTTP-backed [`GenerativeModel`] implementation against a single-turn
//! text generation REST API.

use fleetop_reasoner::GenerativeModel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MODEL_NAME: &str = "gemini-1.5-flash";

pub struct HttpGenerativeModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerativeModel {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl GenerativeModel for HttpGenerativeModel {
    async fn generate(&self, prompt: &str, max_output_tokens: u32, temperature: f64) -> anyhow::Result<String> {
        let url = format!("{}/models/{MODEL_NAME}:generateContent", self.base_url);
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt.to_string() }],
            }],
            generation_config: GenerationConfig {
                temperature,
                top_p: 0.95,
                top_k: 40,
                max_output_tokens,
            },
        };

        let mut builder = self.client.post(&url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response: GenerateContentResponse = builder
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| anyhow::anyhow!("model response contained no candidates"))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "topP")]
    top_p: f64,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ContentResponse,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    parts: Vec<Part>,
}
