//! Ollama embedding provider
//!
//! Talks to the Ollama `/api/embeddings` endpoint. Failures are mapped to
//! structured error kinds and left to the task retry classifier; there is no
//! retry loop inside the client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, ErrorKind, ProcessingError, Result};

use super::{EmbeddingProvider, ProviderResult};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Ollama embedding provider using nomic-embed-text or similar models
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Map a transport failure to a classifiable error
fn request_error(e: reqwest::Error) -> ProcessingError {
    if e.is_timeout() {
        ProcessingError::timeout(format!("Embedding request timed out: {}", e))
    } else {
        ProcessingError::network(format!("Embedding request failed: {}", e))
    }
}

/// Map a non-success HTTP status to a classifiable error
fn status_error(status: StatusCode, body: &str) -> ProcessingError {
    let message = format!("Embedding failed: HTTP {} {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProcessingError::rate_limited(message)
    } else if status.is_server_error() {
        ProcessingError::network(message)
    } else {
        // 4xx: unknown model, bad request; retrying will not help
        ProcessingError::new(ErrorKind::InvalidConfig, message)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let embed_response: EmbedResponse = response.json().await.map_err(|e| {
            ProcessingError::internal(format!("Failed to parse embedding response: {}", e))
        })?;

        if embed_response.embedding.len() != self.dimensions {
            return Err(ProcessingError::new(
                ErrorKind::InvalidConfig,
                format!(
                    "Model {} returned {} dimensions, expected {}",
                    self.model,
                    embed_response.embedding.len(),
                    self.dimensions
                ),
            ));
        }

        Ok(embed_response.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
