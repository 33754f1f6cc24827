//! Mnemo - conversational memory recall
//!
//! A hybrid retrieval engine over chat history: deterministic session
//! segmentation, dual-vector embeddings (content + context), BM25 fused
//! with HNSW-accelerated cosine search, and a recall service that turns a
//! free-form cue into explained, scored memories.

pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod recall;
pub mod server;
pub mod store;
pub mod tokenize;
pub mod types;

pub use error::{MnemoError, Result};
pub use index::HybridIndex;
pub use recall::RecallService;
pub use store::VectorStore;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
