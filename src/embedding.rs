//! Best-effort embedding generation over an external HTTP service.
//!
//! Embeddings are an enhancement, never a write-path correctness
//! requirement: any failure mode (network error, non-success status,
//! malformed payload, timeout) collapses to `None`, and callers treat
//! "unavailable" and "not configured" identically.

use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

/// Turns text into a fixed-length float vector, or reports unavailability.
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    /// Never errors; `None` means no embedding could be produced.
    async fn generate(&self, text: &str) -> Option<Vec<f32>>;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
///
/// The request shape is `{"model": ..., "input": ...}` and the response is
/// read from `data[0].embedding`. Model and endpoint identity are deployment
/// configuration, not part of the contract.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        // The call duration must be bounded here; the remote service is not
        // under this system's control.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn generate(&self, text: &str) -> Option<Vec<f32>> {
        let payload = json!({
            "model": self.config.model,
            "input": text,
        });

        let mut request = self.client.post(&self.config.api_url).json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "embedding request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "embedding service returned an error");
            return None;
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "embedding response was not valid JSON");
                return None;
            }
        };

        let vector: Option<Vec<f32>> = body
            .get("data")
            .and_then(|data| data.get(0))
            .and_then(|first| first.get("embedding"))
            .and_then(|embedding| embedding.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(serde_json::Value::as_f64)
                    .map(|v| v as f32)
                    .collect()
            });

        match vector {
            Some(vector) if !vector.is_empty() => {
                debug!(dimension = vector.len(), "embedding generated");
                Some(vector)
            }
            _ => {
                warn!("embedding response had no usable vector");
                None
            }
        }
    }
}
