//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - A deterministic reference embedder (character-code seed, no I/O)
//! - OpenAI-compatible HTTP endpoints (text-embedding-3-small and friends)
//!
//! Every vector handed out is unit length. The `version` tag identifies the
//! vector space so stored vectors can be traced back to what produced them.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Version tag of the vector space this embedder produces
    fn version(&self) -> &str;
}

fn embedding_error(message: impl Into<String>) -> AppError {
    AppError::Embedding {
        message: message.into(),
    }
}

/// Reject input no provider should see
fn check_input(text: &str, max_chars: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(embedding_error("Cannot embed empty text"));
    }
    let chars = text.chars().count();
    if chars > max_chars {
        return Err(embedding_error(format!(
            "Text has {} characters, limit is {}",
            chars, max_chars
        )));
    }
    Ok(())
}

/// Scale to unit Euclidean norm. Zero vectors are an error.
pub fn normalize(mut vector: Vec<f32>) -> Result<Vec<f32>> {
    let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude == 0.0 || !magnitude.is_finite() {
        return Err(embedding_error("Embedding has no usable magnitude"));
    }
    vector.iter_mut().for_each(|v| *v /= magnitude);
    Ok(vector)
}

/// Deterministic stand-in for a real embedding model.
///
/// The seed is the sum of the text's UTF-16 code units; component `i` is
/// `frac(sin(seed + i) * 10000) * 2 - 1`, and the result is normalized.
/// Identical text always maps to the identical vector. The values carry
/// no semantic meaning.
pub struct ReferenceEmbedder {
    dimension: usize,
    max_input_chars: usize,
    version: String,
}

impl ReferenceEmbedder {
    pub fn new(dimension: usize, max_input_chars: usize, version: impl Into<String>) -> Self {
        Self {
            dimension,
            max_input_chars,
            version: version.into(),
        }
    }

    fn seed(text: &str) -> f64 {
        text.encode_utf16().map(f64::from).sum()
    }

    fn pseudo_random(n: f64) -> f64 {
        let x = n.sin() * 10000.0;
        x - x.floor()
    }

    fn generate(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text, self.max_input_chars)?;
        let seed = Self::seed(text);
        let raw: Vec<f32> = (0..self.dimension)
            .map(|i| (Self::pseudo_random(seed + i as f64) * 2.0 - 1.0) as f32)
            .collect();
        normalize(raw)
    }
}

impl Default for ReferenceEmbedder {
    fn default() -> Self {
        let config = EmbeddingConfig::default();
        Self::new(config.dimension, config.max_input_chars, config.version)
    }
}

#[async_trait]
impl Embedder for ReferenceEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.generate(text)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.generate(text)).collect()
    }

    fn model_name(&self) -> &str {
        "reference"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_input_chars: usize,
    max_retries: u32,
    version: String,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Inputs per request
    const BATCH_SIZE: usize = 100;

    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_input_chars: config.max_input_chars,
            max_retries: config.max_retries,
            version: config.version.clone(),
        })
    }

    /// Make request with retry on transient failures
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(Duration::from_secs(10 * u64::from(self.max_retries.max(1)))),
            ..Default::default()
        };
        let max_attempts = self.max_retries + 1;
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        retry(policy, || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.make_request(texts).await {
                Ok(embeddings) => Ok(embeddings),
                Err((err, transient)) if transient && attempt < max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "Embedding request failed, retrying"
                    );
                    Err(backoff::Error::transient(err))
                }
                Err((err, _)) => Err(backoff::Error::permanent(err)),
            }
        })
        .await
    }

    /// The bool marks failures worth retrying
    async fn make_request(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, (AppError, bool)> {
        let url = format!("{}/embeddings", self.base_url);
        let request = OpenAIRequest {
            input: texts,
            model: &self.model,
            dimensions: self.model.starts_with("text-embedding-3").then_some(self.dimension),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| (embedding_error(format!("Request failed: {}", e)), true))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let transient = status.is_server_error() || status.as_u16() == 429;
            return Err((
                embedding_error(format!("API error {}: {}", status, body)),
                transient,
            ));
        }

        let mut result: OpenAIResponse = response.json().await.map_err(|e| {
            (embedding_error(format!("Failed to parse response: {}", e)), false)
        })?;

        if result.data.len() != texts.len() {
            return Err((
                embedding_error(format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    result.data.len()
                )),
                false,
            ));
        }

        result.data.sort_by_key(|e| e.index);
        result
            .data
            .into_iter()
            .map(|e| {
                if e.embedding.len() != self.dimension {
                    return Err(embedding_error(format!(
                        "Expected dimension {}, got {}",
                        self.dimension,
                        e.embedding.len()
                    )));
                }
                normalize(e.embedding)
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e| (e, false))
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text, self.max_input_chars)?;
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| embedding_error("Empty response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            check_input(text, self.max_input_chars)?;
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(Self::BATCH_SIZE) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// Embedder wrapper that records latency and failures
pub struct InstrumentedEmbedder {
    inner: Arc<dyn Embedder>,
}

impl InstrumentedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Embedder for InstrumentedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let result = self.inner.embed(text).await;
        crate::metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            self.inner.model_name(),
            1,
            result.is_ok(),
        );
        result
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let result = self.inner.embed_batch(texts).await;
        crate::metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            self.inner.model_name(),
            texts.len(),
            result.is_ok(),
        );
        result
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            })?;
            Arc::new(OpenAIEmbedder::new(key, config)?)
        }
        "reference" => Arc::new(ReferenceEmbedder::new(
            config.dimension,
            config.max_input_chars,
            config.version.clone(),
        )),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using reference");
            Arc::new(ReferenceEmbedder::new(
                config.dimension,
                config.max_input_chars,
                config.version.clone(),
            ))
        }
    };

    Ok(Arc::new(InstrumentedEmbedder::new(embedder)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn test_reference_embedder_is_unit_length() {
        let embedder = ReferenceEmbedder::default();
        for text in ["hello", "How do I use 'the'?", "日本語の助詞", "a"] {
            let embedding = embedder.embed(text).await.unwrap();
            assert_eq!(embedding.len(), 1536);
            assert!((norm(&embedding) - 1.0).abs() < 1e-4, "norm for {text:?}");
        }
    }

    #[tokio::test]
    async fn test_reference_embedder_is_deterministic() {
        let a = ReferenceEmbedder::default();
        let b = ReferenceEmbedder::default();
        let first = a.embed("particles: は and が").await.unwrap();
        assert_eq!(first, a.embed("particles: は and が").await.unwrap());
        assert_eq!(first, b.embed("particles: は and が").await.unwrap());
        assert_ne!(first, a.embed("particles: を").await.unwrap());
    }

    #[tokio::test]
    async fn test_reference_embedder_rejects_bad_input() {
        let embedder = ReferenceEmbedder::new(8, 10, "test");
        assert!(matches!(
            embedder.embed("   ").await,
            Err(AppError::Embedding { .. })
        ));
        assert!(matches!(
            embedder.embed("this is far too long").await,
            Err(AppError::Embedding { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let embedder = ReferenceEmbedder::new(32, 100, "test");
        let texts = vec!["one".to_string(), "two".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], embedder.embed("two").await.unwrap());
    }

    #[test]
    fn test_seed_uses_utf16_units() {
        assert_eq!(ReferenceEmbedder::seed("ab"), 97.0 + 98.0);
        // U+1F600 is a surrogate pair in UTF-16
        assert_eq!(ReferenceEmbedder::seed("😀"), f64::from(0xD83Du16) + f64::from(0xDE00u16));
    }

    #[test]
    fn test_normalize_rejects_zero() {
        assert!(normalize(vec![0.0, 0.0]).is_err());
        let unit = normalize(vec![3.0, 4.0]).unwrap();
        assert_eq!(unit, vec![0.6, 0.8]);
    }

    #[test]
    fn test_factory_falls_back_to_reference() {
        let config = EmbeddingConfig {
            provider: "something-else".to_string(),
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "reference");
        assert_eq!(embedder.version(), "reference-v1");
    }

    #[test]
    fn test_factory_requires_openai_key() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
