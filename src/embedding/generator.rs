//! Dual-vector generation for ingested sessions
//!
//! Embeds every session's content and context text in dynamic batches.
//! Batches are sized by an estimated token budget so a single request
//! never blows the provider limit; the 250-texts-per-request cap is
//! enforced one layer down by the embedder itself.
//!
//! Provider failures are absorbed here: the affected slice is zero-filled
//! and ingestion continues, keeping the store aligned.

use std::sync::Arc;

use crate::error::Result;
use crate::types::Session;

use super::Embedder;

/// Leave headroom under the common 20k-token request ceiling
const MAX_TOKENS_PER_BATCH: usize = 19_000;

pub struct DualVectorGenerator {
    embedder: Arc<dyn Embedder>,
}

impl DualVectorGenerator {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Rough token estimate; Chinese text runs about 1.5 tokens per char
    fn estimate_tokens(text: &str) -> usize {
        (text.chars().count() as f32 * 1.5) as usize
    }

    /// Split sessions into contiguous `(start, end)` ranges whose combined
    /// content+context estimate stays under the batch budget
    fn plan_batches(sessions: &[Session]) -> Vec<(usize, usize)> {
        let mut batches = Vec::new();
        let mut current_start = 0;
        let mut current_tokens = 0;

        for (i, session) in sessions.iter().enumerate() {
            let session_tokens = Self::estimate_tokens(&session.meta.content_text)
                + Self::estimate_tokens(&session.meta.context_text);
            if current_tokens + session_tokens > MAX_TOKENS_PER_BATCH && i > current_start {
                batches.push((current_start, i));
                current_start = i;
                current_tokens = session_tokens;
            } else {
                current_tokens += session_tokens;
            }
        }
        if current_start < sessions.len() {
            batches.push((current_start, sessions.len()));
        }
        batches
    }

    /// Embed a batch, substituting zero vectors when the provider fails
    async fn embed_or_zero(&self, texts: &[String]) -> Vec<Vec<f32>> {
        match self.embedder.embed(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                tracing::warn!(
                    expected = texts.len(),
                    got = vectors.len(),
                    "provider returned a short batch; zero-filling"
                );
                vec![vec![0.0; self.embedder.dimensions()]; texts.len()]
            }
            Err(e) => {
                tracing::warn!(error = %e, batch = texts.len(), "embedding batch failed; zero-filling");
                vec![vec![0.0; self.embedder.dimensions()]; texts.len()]
            }
        }
    }

    /// Fill `content_vector` / `context_vector` on every session. Returns
    /// the number of sessions that ended up with a zero content vector.
    pub async fn generate(&self, sessions: &mut [Session]) -> Result<usize> {
        if sessions.is_empty() {
            return Ok(0);
        }
        let batches = Self::plan_batches(sessions);
        tracing::info!(
            sessions = sessions.len(),
            batches = batches.len(),
            model = self.embedder.model_name(),
            "generating dual vectors"
        );

        let mut failed = 0usize;
        for (start, end) in batches {
            let content_texts: Vec<String> = sessions[start..end]
                .iter()
                .map(|s| s.meta.content_text.clone())
                .collect();
            let context_texts: Vec<String> = sessions[start..end]
                .iter()
                .map(|s| s.meta.context_text.clone())
                .collect();

            let content_vectors = self.embed_or_zero(&content_texts).await;
            let context_vectors = self.embed_or_zero(&context_texts).await;

            for ((session, content), context) in sessions[start..end]
                .iter_mut()
                .zip(content_vectors)
                .zip(context_vectors)
            {
                if content.iter().all(|&x| x == 0.0) {
                    failed += 1;
                }
                session.content_vector = content;
                session.context_vector = context;
            }
        }

        if failed > 0 {
            tracing::warn!(failed, total = sessions.len(), "sessions kept zero content vectors");
        }
        Ok(failed)
    }
}
