//! Configuration for the SmartDoc session.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Retry schedule used when deleting a persisted index directory.
///
/// Attempt `n` (1-based) that fails is followed by a pause of
/// `base_delay * 2^(n - 1)`, so the default waits 200ms, 400ms, 800ms and so on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovalPolicy {
    /// Number of removal attempts before the final one.
    pub attempts: u32,
    /// Backoff unit between attempts.
    pub base_delay: Duration,
    /// Pause after releasing in-memory handles, before touching the filesystem.
    pub release_pause: Duration,
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        Self {
            attempts: 6,
            base_delay: Duration::from_millis(200),
            release_pause: Duration::from_millis(400),
        }
    }
}

impl RemovalPolicy {
    /// A policy with no pauses, for tests and tooling that own the directory outright.
    pub fn immediate(attempts: u32) -> Self {
        Self { attempts, base_delay: Duration::ZERO, release_pause: Duration::ZERO }
    }

    /// Pause after failed attempt `attempt` (1-based). Saturates instead of overflowing.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Configuration parameters for a [`Session`](crate::Session).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmartDocConfig {
    /// Identifier of the embedding model.
    pub embedding_model: String,
    /// Identifier of the generative model.
    pub generative_model: String,
    /// Directory holding the persisted vector index.
    pub persist_location: PathBuf,
    /// Directory where raw uploads are staged before extraction.
    pub upload_dir: PathBuf,
    /// Number of chunks retrieved per question when the caller does not say.
    pub default_k: usize,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Upper bound on a single generative model call.
    pub model_timeout: Duration,
    /// Upper bound on the retrieval step of a question (embedding the query
    /// and searching the index).
    pub retrieval_timeout: Duration,
    /// Retry schedule for deleting the persisted index.
    pub removal: RemovalPolicy,
    /// Attach cosine similarity to search results as their relevance score.
    pub attach_scores: bool,
}

impl Default for SmartDocConfig {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-004".to_string(),
            generative_model: "gemini-2.5-flash".to_string(),
            persist_location: PathBuf::from("./vectorstore"),
            upload_dir: PathBuf::from("./uploaded_docs"),
            default_k: 5,
            chunk_size: 500,
            chunk_overlap: 100,
            model_timeout: Duration::from_secs(60),
            retrieval_timeout: Duration::from_secs(30),
            removal: RemovalPolicy::default(),
            attach_scores: true,
        }
    }
}

impl SmartDocConfig {
    /// Create a new builder for constructing a [`SmartDocConfig`].
    pub fn builder() -> SmartDocConfigBuilder {
        SmartDocConfigBuilder::default()
    }

    /// Build a configuration from the defaults overlaid with environment variables.
    ///
    /// Recognized variables: `EMBEDDING_MODEL`, `MODEL_NAME`, `VECTOR_DB_PATH`,
    /// `UPLOAD_DIR`, `TOP_K`, `CHUNK_SIZE`, `CHUNK_OVERLAP`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a numeric variable does not parse or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            builder = builder.embedding_model(model);
        }
        if let Some(model) = lookup("MODEL_NAME") {
            builder = builder.generative_model(model);
        }
        if let Some(path) = lookup("VECTOR_DB_PATH") {
            builder = builder.persist_location(path);
        }
        if let Some(path) = lookup("UPLOAD_DIR") {
            builder = builder.upload_dir(path);
        }
        if let Some(value) = lookup("TOP_K") {
            builder = builder.default_k(parse_usize("TOP_K", &value)?);
        }
        if let Some(value) = lookup("CHUNK_SIZE") {
            builder = builder.chunk_size(parse_usize("CHUNK_SIZE", &value)?);
        }
        if let Some(value) = lookup("CHUNK_OVERLAP") {
            builder = builder.chunk_overlap(parse_usize("CHUNK_OVERLAP", &value)?);
        }
        builder.build()
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|e| {
        RagError::Config(format!("{key} must be a non-negative integer, got '{value}': {e}"))
    })
}

/// Builder for constructing a validated [`SmartDocConfig`].
#[derive(Debug, Clone, Default)]
pub struct SmartDocConfigBuilder {
    config: SmartDocConfig,
}

impl SmartDocConfigBuilder {
    /// Set the embedding model identifier.
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    /// Set the generative model identifier.
    pub fn generative_model(mut self, model: impl Into<String>) -> Self {
        self.config.generative_model = model.into();
        self
    }

    /// Set the directory for the persisted vector index.
    pub fn persist_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.persist_location = path.into();
        self
    }

    /// Set the directory used to stage raw uploads.
    pub fn upload_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = path.into();
        self
    }

    /// Set the default number of chunks retrieved per question.
    pub fn default_k(mut self, k: usize) -> Self {
        self.config.default_k = k;
        self
    }

    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the timeout applied to each generative model call.
    pub fn model_timeout(mut self, timeout: Duration) -> Self {
        self.config.model_timeout = timeout;
        self
    }

    /// Set the timeout applied to the retrieval step of each question.
    pub fn retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.config.retrieval_timeout = timeout;
        self
    }

    /// Set the retry schedule for deleting the persisted index.
    pub fn removal(mut self, policy: RemovalPolicy) -> Self {
        self.config.removal = policy;
        self
    }

    /// Choose whether search results carry their similarity as a score.
    pub fn attach_scores(mut self, attach: bool) -> Self {
        self.config.attach_scores = attach;
        self
    }

    /// Build the [`SmartDocConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_size == 0`
    /// - `chunk_overlap >= chunk_size`
    /// - `default_k == 0`
    /// - `removal.attempts == 0`
    pub fn build(self) -> Result<SmartDocConfig> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.default_k == 0 {
            return Err(RagError::Config("default_k must be greater than zero".to_string()));
        }
        if config.removal.attempts == 0 {
            return Err(RagError::Config(
                "removal.attempts must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SmartDocConfig::builder().build().unwrap();
        assert_eq!(config, SmartDocConfig::default());
        assert_eq!(config.default_k, 5);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let err =
            SmartDocConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::Config(msg) if msg.contains("chunk_overlap")));
    }

    #[test]
    fn rejects_zero_k_and_zero_attempts() {
        assert!(SmartDocConfig::builder().default_k(0).build().is_err());
        assert!(SmartDocConfig::builder().removal(RemovalPolicy::immediate(0)).build().is_err());
    }

    #[test]
    fn removal_backoff_doubles_each_attempt() {
        let policy = RemovalPolicy::default();
        let delays: Vec<u64> =
            (1..=policy.attempts).map(|n| policy.delay_after(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![200, 400, 800, 1600, 3200, 6400]);

        assert_eq!(RemovalPolicy::immediate(3).delay_after(3), Duration::ZERO);
        assert!(policy.delay_after(40) >= policy.delay_after(6));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = SmartDocConfig::from_lookup(lookup_from(&[
            ("MODEL_NAME", "gemini-2.0-flash"),
            ("VECTOR_DB_PATH", "/tmp/index"),
            ("TOP_K", " 3 "),
            ("CHUNK_SIZE", "1000"),
            ("CHUNK_OVERLAP", "150"),
        ]))
        .unwrap();

        assert_eq!(config.generative_model, "gemini-2.0-flash");
        assert_eq!(config.persist_location, PathBuf::from("/tmp/index"));
        assert_eq!(config.default_k, 3);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 150);
        assert_eq!(config.embedding_model, "text-embedding-004");
    }

    #[test]
    fn environment_rejects_non_numeric_values() {
        let err = SmartDocConfig::from_lookup(lookup_from(&[("TOP_K", "five")])).unwrap_err();
        assert!(matches!(err, RagError::Config(msg) if msg.contains("TOP_K")));
    }
}
