//! Hybrid retrieval index
//!
//! Implements:
//! - BM25-Okapi lexical scoring over jieba tokens
//! - HNSW approximate vector search with a linear fallback
//! - Weighted fusion of the two signals plus metadata filters

mod ann;
mod bm25;
mod hybrid;

pub use ann::{cosine_from_distance, squared_l2, AnnParams, HnswGraph};
pub use bm25::{normalize_scores, Bm25Index, DEFAULT_B, DEFAULT_K1};
pub use hybrid::{
    FusionWeights, HybridIndex, IndexConfig, SearchHit, SearchQuery, SubIndexState,
};
