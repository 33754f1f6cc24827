//! Hybrid scoring engine
//!
//! Wraps the vector store with a BM25 lexical sub-index and two HNSW
//! graphs (one per vector role), fusing the normalized lexical score with
//! the blended dual-vector cosine into a single ranking score, then
//! applying metadata filters.
//!
//! Once built, every read path is side-effect-free; writers (`add`,
//! `build_*`) need `&mut self`. The one exception is the lexical state,
//! which sits behind a single-writer lock so a stale or missing BM25
//! index can be rebuilt lazily from a read path. The ANN graphs are never
//! rebuilt behind the caller's back: when they are absent or stale on a
//! corpus large enough to want them, the linear backend is used and a
//! one-shot warning is emitted.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::ann::{cosine_from_distance, AnnParams, HnswGraph};
use super::bm25::{normalize_scores, Bm25Index};
use crate::error::{MnemoError, Result};
use crate::store::VectorStore;
use crate::tokenize::tokenize;
use crate::types::{matches_all, Filter, SessionMeta};

/// Index construction / backend-selection knobs
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Corpus size at which the ANN backend takes over from linear scan
    pub ann_threshold: usize,
    /// HNSW connectivity
    pub hnsw_m: usize,
    /// HNSW construction width
    pub ef_construction: usize,
    /// Floor for the search-time candidate width
    pub ef_search: usize,
    /// BM25 term-frequency saturation
    pub bm25_k1: f32,
    /// BM25 length normalization
    pub bm25_b: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ann_threshold: 5000,
            hnsw_m: 32,
            ef_construction: 200,
            ef_search: 64,
            bm25_k1: super::bm25::DEFAULT_K1,
            bm25_b: super::bm25::DEFAULT_B,
        }
    }
}

/// Score fusion weights. All four are runtime parameters; the defaults
/// come from offline evaluation.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    /// Weight of the normalized BM25 score
    pub bm25: f32,
    /// Weight of the blended vector score
    pub vector: f32,
    /// Content share of the dual-vector blend
    pub content: f32,
    /// Context share of the dual-vector blend
    pub context: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { bm25: 0.5, vector: 0.5, content: 0.85, context: 0.15 }
    }
}

/// One search invocation
#[derive(Debug, Clone)]
pub struct SearchQuery<'a> {
    /// Query content embedding (unit or unnormalized; normalized on use)
    pub content_vector: &'a [f32],
    /// Optional query context embedding
    pub context_vector: Option<&'a [f32]>,
    /// Query text for the lexical side
    pub text: &'a str,
    /// Number of results to return
    pub top_k: usize,
    /// Metadata filters, conjoined
    pub filters: &'a [Filter],
    pub weights: FusionWeights,
}

/// One scored result with its per-signal breakdown
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Store index of the session
    pub index: usize,
    /// Fused ranking score
    pub hybrid: f32,
    /// Normalized BM25 score in `[0, 1]`
    pub bm25: f32,
    /// Blended vector score
    pub vector: f32,
    /// Content cosine similarity
    pub content: f32,
    /// Context cosine similarity, when a context query was given
    pub context: Option<f32>,
    pub meta: SessionMeta,
}

#[derive(Debug, Default)]
struct LexicalState {
    index: Option<Bm25Index>,
    stale: bool,
}

/// Observable life-cycle of a sub-index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubIndexState {
    Uninitialized,
    Built,
    Stale,
}

/// The hybrid index over a vector store
#[derive(Debug)]
pub struct HybridIndex {
    store: VectorStore,
    config: IndexConfig,
    lexical: RwLock<LexicalState>,
    content_ann: Option<HnswGraph>,
    context_ann: Option<HnswGraph>,
    ann_stale: bool,
    ann_warned: AtomicBool,
}

impl HybridIndex {
    pub fn new(store: VectorStore, config: IndexConfig) -> Self {
        Self {
            store,
            config,
            lexical: RwLock::new(LexicalState::default()),
            content_ann: None,
            context_ann: None,
            ann_stale: false,
            ann_warned: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Append a session to the underlying store. Both sub-indices become
    /// stale; the lexical one heals itself on the next search, the ANN
    /// graphs wait for an explicit `build_ann`.
    pub fn add(
        &mut self,
        content_vector: Vec<f32>,
        context_vector: Vec<f32>,
        meta: SessionMeta,
    ) -> Result<usize> {
        let i = self.store.add(content_vector, context_vector, meta)?;
        self.lexical.get_mut().stale = true;
        if self.content_ann.is_some() {
            self.ann_stale = true;
        }
        Ok(i)
    }

    /// Build the BM25 statistics from the cached session tokens
    pub fn build_lexical(&mut self) {
        let state = self.lexical.get_mut();
        *state = LexicalState {
            index: Some(Self::make_bm25(&self.store, &self.config)),
            stale: false,
        };
        tracing::info!(documents = self.store.len(), "bm25 index built");
    }

    fn make_bm25(store: &VectorStore, config: &IndexConfig) -> Bm25Index {
        Bm25Index::build(
            store.metadata().iter().map(|m| m.tokens.iter()),
            config.bm25_k1,
            config.bm25_b,
        )
    }

    /// Build both HNSW graphs over the full corpus
    pub fn build_ann(&mut self) {
        let params = AnnParams {
            m: self.config.hnsw_m,
            ef_construction: self.config.ef_construction,
            ..AnnParams::default()
        };
        self.content_ann = Some(HnswGraph::build(self.store.content_vectors(), &params));
        self.context_ann = Some(HnswGraph::build(self.store.context_vectors(), &params));
        self.ann_stale = false;
        self.ann_warned.store(false, Ordering::Relaxed);
        tracing::info!(
            vectors = self.store.len(),
            m = params.m,
            "hnsw graphs built"
        );
    }

    /// Install graphs loaded from companion files. Rejected if their node
    /// count disagrees with the store.
    pub fn set_ann(&mut self, content: HnswGraph, context: HnswGraph) -> Result<()> {
        if content.len() != self.store.len() || context.len() != self.store.len() {
            return Err(MnemoError::Config(format!(
                "ann companions hold {}/{} nodes but the store has {} entries",
                content.len(),
                context.len(),
                self.store.len()
            )));
        }
        self.content_ann = Some(content);
        self.context_ann = Some(context);
        self.ann_stale = false;
        Ok(())
    }

    pub fn content_ann(&self) -> Option<&HnswGraph> {
        self.content_ann.as_ref()
    }

    pub fn context_ann(&self) -> Option<&HnswGraph> {
        self.context_ann.as_ref()
    }

    pub fn lexical_state(&self) -> SubIndexState {
        let guard = self.lexical.read();
        match (&guard.index, guard.stale) {
            (None, _) => SubIndexState::Uninitialized,
            (Some(_), false) => SubIndexState::Built,
            (Some(_), true) => SubIndexState::Stale,
        }
    }

    pub fn ann_state(&self) -> SubIndexState {
        match (&self.content_ann, self.ann_stale) {
            (None, _) => SubIndexState::Uninitialized,
            (Some(_), false) => SubIndexState::Built,
            (Some(_), true) => SubIndexState::Stale,
        }
    }

    /// Whether a search right now would use the ANN backend
    pub fn ann_active(&self) -> bool {
        self.content_ann.is_some() && !self.ann_stale && self.store.len() >= self.config.ann_threshold
    }

    /// Hybrid search. Returns up to `top_k` hits ordered by descending
    /// fused score; ties break toward the smaller store index.
    pub fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<SearchHit>> {
        let n = self.store.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        if query.content_vector.len() != self.store.dimension() {
            return Err(MnemoError::InvalidInput(format!(
                "query vector has dimension {}, index expects {}",
                query.content_vector.len(),
                self.store.dimension()
            )));
        }

        // 1. Lexical scores, normalized by the max
        let query_tokens = tokenize(query.text);
        let mut bm25 = self.lexical_scores(&query_tokens)?;
        normalize_scores(&mut bm25);

        // 2. Vector similarities via the active backend
        let q_content = unit(query.content_vector);
        let cos_content = self.similarities(&q_content, VectorRole::Content)?;
        let cos_context = match query.context_vector {
            Some(v) => {
                if v.len() != self.store.dimension() {
                    return Err(MnemoError::InvalidInput(
                        "context query vector dimension mismatch".to_string(),
                    ));
                }
                Some(self.similarities(&unit(v), VectorRole::Context)?)
            }
            None => None,
        };

        // 3. Blend + fuse
        let w = &query.weights;
        let mut eligible: Vec<usize> = Vec::with_capacity(n);
        let mut hybrid = vec![0.0f32; n];
        let mut vector = vec![0.0f32; n];
        for i in 0..n {
            let v = match &cos_context {
                Some(ctx) => w.content * cos_content[i] + w.context * ctx[i],
                None => cos_content[i],
            };
            vector[i] = v;
            hybrid[i] = w.bm25 * bm25[i] + w.vector * v;
            if let Some(meta) = self.store.meta(i) {
                if matches_all(query.filters, meta) {
                    eligible.push(i);
                }
            }
        }

        // 4. Rank: fused score descending, then smaller index
        eligible.sort_by(|&a, &b| hybrid[b].total_cmp(&hybrid[a]).then(a.cmp(&b)));
        eligible.truncate(query.top_k);

        Ok(eligible
            .into_iter()
            .filter_map(|i| {
                self.store.meta(i).map(|meta| SearchHit {
                    index: i,
                    hybrid: hybrid[i],
                    bm25: bm25[i],
                    vector: vector[i],
                    content: cos_content[i],
                    context: cos_context.as_ref().map(|c| c[i]),
                    meta: meta.clone(),
                })
            })
            .collect())
    }

    /// BM25 scores for the query tokens, rebuilding the statistics first
    /// if they are missing or stale.
    fn lexical_scores(&self, query_tokens: &[String]) -> Result<Vec<f32>> {
        {
            let guard = self.lexical.read();
            if let (Some(index), false) = (&guard.index, guard.stale) {
                return Ok(index.scores(query_tokens));
            }
        }
        let mut guard = self.lexical.write();
        if guard.index.is_none() || guard.stale {
            tracing::info!(documents = self.store.len(), "rebuilding stale bm25 index");
            guard.index = Some(Self::make_bm25(&self.store, &self.config));
            guard.stale = false;
        }
        match &guard.index {
            Some(index) => Ok(index.scores(query_tokens)),
            None => Err(MnemoError::IndexNotBuilt("bm25")),
        }
    }

    /// Full cosine-similarity vector for one vector role
    fn similarities(&self, q: &[f32], role: VectorRole) -> Result<Vec<f32>> {
        match self.ann_similarities(q, role) {
            Ok(sims) => Ok(sims),
            Err(MnemoError::IndexNotBuilt(_)) => Ok(self.linear_similarities(q, role)),
            Err(e) => Err(e),
        }
    }

    fn ann_similarities(&self, q: &[f32], role: VectorRole) -> Result<Vec<f32>> {
        let n = self.store.len();
        if n < self.config.ann_threshold {
            // Small corpus: exact scan is cheap and exact
            return Err(MnemoError::IndexNotBuilt("ann"));
        }
        let graph = match role {
            VectorRole::Content => self.content_ann.as_ref(),
            VectorRole::Context => self.context_ann.as_ref(),
        };
        let (Some(graph), false) = (graph, self.ann_stale) else {
            if !self.ann_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    corpus = n,
                    threshold = self.config.ann_threshold,
                    "corpus large enough for ann but no usable graph; falling back to linear scan"
                );
            }
            return Err(MnemoError::IndexNotBuilt("ann"));
        };

        let vectors = match role {
            VectorRole::Content => self.store.content_vectors(),
            VectorRole::Context => self.store.context_vectors(),
        };
        // The fusion needs the whole similarity vector, so ask the graph
        // for every neighbor; unreachable nodes keep similarity zero.
        let ef = n.max(self.config.ef_search);
        let mut sims = vec![0.0f32; n];
        for (id, dist) in graph.search(vectors, q, n, ef) {
            let i = id as usize;
            let zero = match role {
                VectorRole::Content => self.store.content_is_zero(i),
                VectorRole::Context => self.store.context_is_zero(i),
            };
            // cos = 1 - d/2 only holds between unit vectors; the zero
            // sentinel must score 0
            sims[i] = if zero { 0.0 } else { cosine_from_distance(dist) };
        }
        Ok(sims)
    }

    fn linear_similarities(&self, q: &[f32], role: VectorRole) -> Vec<f32> {
        let vectors = match role {
            VectorRole::Content => self.store.content_vectors(),
            VectorRole::Context => self.store.context_vectors(),
        };
        vectors.iter().map(|v| dot(q, v)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum VectorRole {
    Content,
    Context,
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn unit(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    crate::store::normalize_in_place(&mut out);
    out
}
