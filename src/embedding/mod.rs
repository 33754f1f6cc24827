//! Embedding provider shim
//!
//! The engine treats the provider as an opaque `embed(texts) -> vectors`
//! contract. Two backends:
//! - REST client for any OpenAI-compatible `/embeddings` endpoint
//! - deterministic term-hashing fallback (no network, good for tests and
//!   offline smoke runs)

mod generator;
mod hashing;

pub use generator::DualVectorGenerator;
pub use hashing::HashingEmbedder;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{MnemoError, Result};

/// Provider hard cap on texts per request
pub const EMBED_BATCH_LIMIT: usize = 250;

/// Trait for embedding backends
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per text, in order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality
    fn dimensions(&self) -> usize;

    /// Backend/model name for logs and stats
    fn model_name(&self) -> &str;
}

/// Embedder construction options
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Backend selector: "rest" or "hashing"
    pub backend: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            backend: "hashing".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 768,
        }
    }
}

/// Create an embedder from configuration
pub fn create_embedder(config: &EmbedderConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend.as_str() {
        "rest" => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| MnemoError::Config("embedding API key required".to_string()))?;
            Ok(Arc::new(RestEmbedder::new(
                config.base_url.clone(),
                api_key,
                config.model.clone(),
                config.dimensions,
            )))
        }
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        other => Err(MnemoError::Config(format!(
            "unknown embedding backend: {}",
            other
        ))),
    }
}

/// REST client for OpenAI-compatible embedding endpoints
pub struct RestEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl RestEmbedder {
    pub fn new(base_url: String, api_key: String, model: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimensions,
        }
    }

    async fn embed_chunk(&self, chunk: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": chunk,
                "model": self.model,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MnemoError::Provider(format!(
                "embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let items = data["data"]
            .as_array()
            .ok_or_else(|| MnemoError::Provider("malformed embedding response".to_string()))?;

        let mut vectors = Vec::with_capacity(items.len());
        for item in items {
            let vector: Vec<f32> = item["embedding"]
                .as_array()
                .ok_or_else(|| MnemoError::Provider("missing embedding array".to_string()))?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            if vector.len() != self.dimensions {
                return Err(MnemoError::Provider(format!(
                    "provider returned dimension {}, expected {}",
                    vector.len(),
                    self.dimensions
                )));
            }
            vectors.push(vector);
        }
        if vectors.len() != chunk.len() {
            return Err(MnemoError::Provider(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                chunk.len()
            )));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for RestEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_LIMIT) {
            all.extend(self.embed_chunk(chunk).await?);
        }
        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
