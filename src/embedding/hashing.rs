//! Term-hashing embedding fallback
//!
//! Deterministic, dependency-free vectors via the feature-hashing trick.
//! Nowhere near a learned embedding, but stable across runs, which makes
//! it the backend of choice for tests and credential-less smoke builds.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::Result;
use crate::tokenize::tokenize;

use super::Embedder;

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_token(token: &str, dimensions: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % dimensions
    }

    /// Sign hash spreads collisions across both directions
    fn hash_sign(token: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        format!("{}_sign", token).hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];
        if tokens.is_empty() {
            return embedding;
        }

        let mut tf: HashMap<String, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.clone()).or_insert(0.0) += 1.0;
        }

        for (token, count) in tf {
            let idx = Self::hash_token(&token, self.dimensions);
            embedding[idx] += Self::hash_sign(&token) * count;
        }

        crate::store::normalize_in_place(&mut embedding);
        embedding
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_and_unit_norm() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec!["明天和张三讨论项目".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);

        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_text_zero_vector() {
        let embedder = HashingEmbedder::new(32);
        let out = embedder.embed(&["".to_string()]).await.unwrap();
        assert!(out[0].iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_similar_texts_closer_than_unrelated() {
        let embedder = HashingEmbedder::new(256);
        let out = embedder
            .embed(&[
                "讨论项目进展和预算".to_string(),
                "项目预算讨论".to_string(),
                "周末去公园散步".to_string(),
            ])
            .await
            .unwrap();
        let sim_related = super::super::cosine_similarity(&out[0], &out[1]);
        let sim_unrelated = super::super::cosine_similarity(&out[0], &out[2]);
        assert!(sim_related > sim_unrelated);
    }
}
