//! Configuration for the assignment engine
//!
//! All knobs are read from environment variables with sensible defaults,
//! then validated once at engine construction.

use crate::error::{EngineError, Result};
use std::env;
use tracing::warn;

/// Configuration for the remote embedding provider
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Model identifier sent to the provider
    pub model: String,

    /// Expected embedding dimension
    pub dimensions: usize,

    /// API key for the provider; empty disables remote generation
    pub api_key: String,

    /// Base URL of the embeddings endpoint
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 5,
        }
    }
}

/// Configuration for the engine proper
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Embedding provider settings
    pub embedding: EmbeddingConfig,

    /// Candidates kept by the similarity filter
    pub similarity_top_k: usize,

    /// LinUCB exploration coefficient
    pub alpha: f64,

    /// Ridge regularization for per-arm matrices
    pub lambda: f64,

    /// Workload count treated as fully loaded when normalizing features
    pub workload_cap: u32,

    /// Urgency horizon in hours; tasks due further out score zero urgency
    pub urgency_horizon_hours: f64,

    /// Lower reward clipping bound
    pub min_reward: f64,

    /// Upper reward clipping bound
    pub max_reward: f64,

    /// Storage conflict retries before surfacing an internal error
    pub max_storage_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            similarity_top_k: 3,
            alpha: 1.0,
            lambda: 1.0,
            workload_cap: 10,
            urgency_horizon_hours: 72.0,
            min_reward: -2.0,
            max_reward: 2.0,
            max_storage_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `LACHESIS_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            embedding: EmbeddingConfig {
                model: env_string("LACHESIS_EMBEDDING_MODEL", defaults.embedding.model),
                dimensions: env_parse("LACHESIS_EMBEDDING_DIM", defaults.embedding.dimensions)?,
                api_key: env_string("LACHESIS_EMBEDDING_API_KEY", defaults.embedding.api_key),
                base_url: env_string("LACHESIS_EMBEDDING_BASE_URL", defaults.embedding.base_url),
                timeout_secs: env_parse(
                    "LACHESIS_EMBEDDING_TIMEOUT_SECS",
                    defaults.embedding.timeout_secs,
                )?,
            },
            similarity_top_k: env_parse("LACHESIS_TOP_K", defaults.similarity_top_k)?,
            alpha: env_parse("LACHESIS_ALPHA", defaults.alpha)?,
            lambda: env_parse("LACHESIS_LAMBDA", defaults.lambda)?,
            workload_cap: env_parse("LACHESIS_WORKLOAD_CAP", defaults.workload_cap)?,
            urgency_horizon_hours: env_parse(
                "LACHESIS_URGENCY_HOURS",
                defaults.urgency_horizon_hours,
            )?,
            min_reward: env_parse("LACHESIS_MIN_REWARD", defaults.min_reward)?,
            max_reward: env_parse("LACHESIS_MAX_REWARD", defaults.max_reward)?,
            max_storage_retries: env_parse(
                "LACHESIS_STORAGE_RETRIES",
                defaults.max_storage_retries,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(EngineError::Config(
                "embedding dimension must be positive".to_string(),
            ));
        }

        if self.similarity_top_k == 0 {
            return Err(EngineError::Config(
                "similarity_top_k must be at least 1".to_string(),
            ));
        }

        if self.alpha < 0.0 {
            return Err(EngineError::Config(format!(
                "alpha must be non-negative, got {}",
                self.alpha
            )));
        }

        if self.lambda <= 0.0 {
            return Err(EngineError::Config(format!(
                "lambda must be positive, got {}",
                self.lambda
            )));
        }

        if self.workload_cap == 0 {
            return Err(EngineError::Config(
                "workload_cap must be at least 1".to_string(),
            ));
        }

        if self.urgency_horizon_hours <= 0.0 {
            return Err(EngineError::Config(format!(
                "urgency horizon must be positive, got {}",
                self.urgency_horizon_hours
            )));
        }

        if self.min_reward >= self.max_reward {
            return Err(EngineError::Config(format!(
                "reward bounds inverted: [{}, {}]",
                self.min_reward, self.max_reward
            )));
        }

        if self.embedding.api_key.is_empty() {
            warn!("No embedding API key configured; similarity will rely on cached embeddings");
        }

        Ok(())
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| EngineError::Config(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
