//! Word segmentation for the lexical index
//!
//! Wraps jieba in search-engine mode: long dictionary words additionally
//! emit their constituent sub-words, so substring queries still hit. The
//! same function tokenizes both the corpus and queries, which keeps the
//! BM25 statistics consistent between the two sides.

use jieba_rs::Jieba;
use once_cell::sync::Lazy;

static SEGMENTER: Lazy<Jieba> = Lazy::new(Jieba::new);

/// Segment text into the ordered token list consumed by BM25.
///
/// Deterministic within a process lifetime. Whitespace and punctuation-only
/// tokens are stripped; runs of ASCII letters/digits survive as one token.
pub fn tokenize(text: &str) -> Vec<String> {
    SEGMENTER
        .cut_for_search(text, true)
        .into_iter()
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .map(str::to_owned)
        .collect()
}
