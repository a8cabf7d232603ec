//! Dispatcher.
//!
//! Publishes an [`ActionEnvelope`] to the message bus. Delivery is
//! at-least-once; the Fixer is expected to tolerate duplicates. A publish
//! exhausting its retry budget surfaces as [`DispatchError::Transient`]; a
//! payload that cannot be serialized is [`DispatchError::Permanent`] and is
//! never retried.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use fleetop_proto::ActionEnvelope;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transient publish failure after {attempts} attempts: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("permanent publish failure: {0}")]
    Permanent(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// The underlying message bus transport. A single `publish` attempt; the
/// [`Dispatcher`] owns retry/backoff so transports stay simple to implement.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish_once(&self, payload: &[u8], attributes: &HashMap<String, String>) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

pub struct Dispatcher<T: BusTransport> {
    transport: T,
    retry: RetryPolicy,
}

impl<T: BusTransport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publish one envelope. Attributes mirror the payload body
    /// (`incident_id`, `service_name`, `action_type`) for downstream
    /// routing/filtering only — consumers must trust the payload, not the
    /// attributes, for anything load-bearing.
    pub async fn publish(&self, envelope: &ActionEnvelope) -> DispatchResult<String> {
        let payload = serde_json::to_vec(envelope)
            .map_err(|e| DispatchError::Permanent(format!("envelope serialization failed: {e}")))?;

        let mut attributes = HashMap::new();
        attributes.insert("incident_id".to_string(), envelope.incident_id.clone());
        attributes.insert("service_name".to_string(), envelope.service.clone());
        attributes.insert("action_type".to_string(), envelope.action.to_string());

        let mut last_err = None;
        for attempt in 1..=self.retry.max_attempts {
            match self.transport.publish_once(&payload, &attributes).await {
                Ok(message_id) => {
                    info!(
                        incident_id = %envelope.incident_id,
                        service = %envelope.service,
                        action = %envelope.action,
                        message_id = %message_id,
                        attempt,
                        "action published to bus"
                    );
                    return Ok(message_id);
                }
                Err(e) => {
                    warn!(
                        incident_id = %envelope.incident_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "bus publish attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.base_delay * attempt).await;
                    }
                }
            }
        }

        Err(DispatchError::Transient {
            attempts: self.retry.max_attempts,
            source: last_err.unwrap_or_else(|| anyhow::anyhow!("unknown publish failure")),
        })
    }
}
