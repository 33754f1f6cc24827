//! Offline ingestion pipeline
//!
//! Chat-dump parsing, deterministic session segmentation, and the text
//! enrichment that feeds the dual-vector embeddings.

mod enrich;
mod parser;
mod session;

pub use enrich::{clean_name, context_line, format_dialogue};
pub use parser::{load_conversation, ConversationMeta};
pub use session::{SegmentConfig, SessionBuilder};
