//! Remote embedding provider over an OpenAI-style embeddings API
//!
//! Turns lists of skill names into unit-norm vectors. Callers treat
//! provider failure as non-fatal: the similarity filter degrades to cached
//! or zero similarity instead of blocking assignment.

use crate::config::EmbeddingConfig;
use crate::embeddings::normalize;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Maximum inputs per batch request
const MAX_BATCH_SIZE: usize = 128;

/// Maximum retry attempts for rate limiting and timeouts
const MAX_RETRIES: usize = 3;

/// Backoff base duration in milliseconds
const BACKOFF_BASE_MS: u64 = 500;

/// Embedding provider trait defining required operations
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one unit-norm embedding per skill name (batched)
    async fn embed_batch(&self, skills: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimensionality (e.g. 1536)
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Embedding provider backed by a remote embeddings endpoint
pub struct RemoteEmbeddingProvider {
    client: Client,
    config: EmbeddingConfig,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl RemoteEmbeddingProvider {
    /// Create a new remote provider from configuration
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(EngineError::Config(
                "embedding API key cannot be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Call the API with retry on rate limits and timeouts
    async fn call_api_with_retry(&self, inputs: &[String]) -> Result<EmbeddingResponse> {
        let mut retries = 0;

        loop {
            match self.call_api(inputs).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if retries >= MAX_RETRIES {
                        return Err(e);
                    }

                    let should_retry = match &e {
                        EngineError::RateLimitExceeded(_) => true,
                        EngineError::Http(inner) => inner.is_timeout() || inner.is_connect(),
                        _ => false,
                    };

                    if !should_retry {
                        return Err(e);
                    }

                    let backoff_ms = BACKOFF_BASE_MS * 2_u64.pow(retries as u32);
                    warn!(
                        "Embedding API call failed, retrying after {}ms (attempt {}/{})",
                        backoff_ms,
                        retries + 1,
                        MAX_RETRIES
                    );

                    sleep(Duration::from_millis(backoff_ms)).await;
                    retries += 1;
                }
            }
        }
    }

    /// Call the API once (no retry)
    async fn call_api(&self, inputs: &[String]) -> Result<EmbeddingResponse> {
        debug!(
            "Requesting {} embeddings from model {}",
            inputs.len(),
            self.config.model
        );

        let request = EmbeddingRequest {
            input: inputs.to_vec(),
            model: self.config.model.clone(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        match status {
            StatusCode::OK => Ok(response.json::<EmbeddingResponse>().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(EngineError::Authentication(
                "Invalid or missing API key".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => Err(EngineError::RateLimitExceeded(
                "embedding provider rate limit exceeded".to_string(),
            )),
            StatusCode::BAD_REQUEST => {
                let error_msg = if let Ok(error_response) = response.json::<ErrorResponse>().await {
                    error_response
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "Bad request".to_string())
                } else {
                    "Bad request".to_string()
                };

                Err(EngineError::Embedding(error_msg))
            }
            _ => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());

                Err(EngineError::Embedding(format!(
                    "API error (status {}): {}",
                    status, error_text
                )))
            }
        }
    }

    /// Validate dimension and finiteness of a returned embedding
    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.config.dimensions {
            return Err(EngineError::Embedding(format!(
                "Expected {} dimensions, got {}",
                self.config.dimensions,
                embedding.len()
            )));
        }

        if embedding.iter().any(|&x| !x.is_finite()) {
            return Err(EngineError::Embedding(
                "Embedding contains invalid values (NaN or Inf)".to_string(),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed_batch(&self, skills: &[&str]) -> Result<Vec<Vec<f32>>> {
        if skills.is_empty() {
            return Ok(Vec::new());
        }

        if skills.iter().any(|s| s.is_empty()) {
            return Err(EngineError::Embedding(
                "skill name cannot be empty".to_string(),
            ));
        }

        let mut all_embeddings = Vec::with_capacity(skills.len());

        for chunk in skills.chunks(MAX_BATCH_SIZE) {
            let inputs: Vec<String> = chunk.iter().map(|s| s.to_string()).collect();
            let response = self.call_api_with_retry(&inputs).await?;

            // Sort by index to maintain input order
            let mut embeddings: Vec<_> = response.data.into_iter().collect();
            embeddings.sort_by_key(|e| e.index);

            if embeddings.len() != chunk.len() {
                return Err(EngineError::Embedding(format!(
                    "provider returned {} embeddings for {} inputs",
                    embeddings.len(),
                    chunk.len()
                )));
            }

            for mut data in embeddings {
                self.validate_embedding(&data.embedding)?;
                normalize(&mut data.embedding);
                all_embeddings.push(data.embedding);
            }
        }

        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            api_key: "test-key".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_provider_creation() {
        let provider = RemoteEmbeddingProvider::new(test_config());
        assert!(provider.is_ok());

        let provider = provider.unwrap();
        assert_eq!(provider.dimensions(), 1536);
        assert_eq!(provider.model_name(), "text-embedding-3-small");
    }

    #[test]
    fn test_empty_api_key_error() {
        let config = EmbeddingConfig {
            api_key: String::new(),
            ..Default::default()
        };
        assert!(RemoteEmbeddingProvider::new(config).is_err());
    }

    #[test]
    fn test_validate_embedding() {
        let provider = RemoteEmbeddingProvider::new(test_config()).unwrap();

        let valid = vec![0.5; 1536];
        assert!(provider.validate_embedding(&valid).is_ok());

        let wrong_dims = vec![0.5; 512];
        assert!(provider.validate_embedding(&wrong_dims).is_err());

        let mut nan_embedding = vec![0.5; 1536];
        nan_embedding[0] = f32::NAN;
        assert!(provider.validate_embedding(&nan_embedding).is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        let provider = RemoteEmbeddingProvider::new(test_config()).unwrap();
        let embeddings = provider.embed_batch(&[]).await.unwrap();
        assert!(embeddings.is_empty());
    }

    #[tokio::test]
    async fn test_empty_skill_name_rejected() {
        let provider = RemoteEmbeddingProvider::new(test_config()).unwrap();
        let result = provider.embed_batch(&["rust", ""]).await;
        assert!(result.is_err());
    }
}
