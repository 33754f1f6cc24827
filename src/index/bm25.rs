//! In-memory BM25-Okapi scorer
//!
//! Built once over the tokenized corpus; scoring produces the full
//! per-document score vector, which the hybrid fusion needs (top-k alone
//! is not enough).

use std::collections::HashMap;

/// Default term-frequency saturation
pub const DEFAULT_K1: f32 = 1.5;
/// Default document-length normalization
pub const DEFAULT_B: f32 = 0.75;

#[derive(Debug)]
struct Postings {
    idf: f32,
    /// (document index, term frequency)
    entries: Vec<(u32, u32)>,
}

/// BM25-Okapi statistics over a fixed corpus
#[derive(Debug)]
pub struct Bm25Index {
    k1: f32,
    b: f32,
    avgdl: f32,
    doc_lens: Vec<u32>,
    postings: HashMap<String, Postings>,
}

impl Bm25Index {
    /// Build statistics from per-document token lists
    pub fn build<'a, I, T>(corpus: I, k1: f32, b: f32) -> Self
    where
        I: IntoIterator<Item = T>,
        T: IntoIterator<Item = &'a String>,
    {
        let mut doc_lens: Vec<u32> = Vec::new();
        let mut postings: HashMap<String, Postings> = HashMap::new();

        for (doc, tokens) in corpus.into_iter().enumerate() {
            let mut tf: HashMap<&String, u32> = HashMap::new();
            let mut len = 0u32;
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
                len += 1;
            }
            doc_lens.push(len);
            for (token, count) in tf {
                postings
                    .entry(token.clone())
                    .or_insert_with(|| Postings { idf: 0.0, entries: Vec::new() })
                    .entries
                    .push((doc as u32, count));
            }
        }

        let n = doc_lens.len();
        let avgdl = if n == 0 {
            0.0
        } else {
            doc_lens.iter().map(|&l| l as f64).sum::<f64>() as f32 / n as f32
        };

        for p in postings.values_mut() {
            let df = p.entries.len() as f32;
            p.idf = (1.0 + (n as f32 - df + 0.5) / (df + 0.5)).ln();
        }

        Self { k1, b, avgdl, doc_lens, postings }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Raw BM25 score of every document against the query tokens. Terms
    /// absent from the corpus contribute nothing; a query with no known
    /// terms yields the zero vector.
    pub fn scores(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_lens.len()];
        if self.avgdl == 0.0 {
            return scores;
        }
        for token in query_tokens {
            let Some(p) = self.postings.get(token) else {
                continue;
            };
            for &(doc, tf) in &p.entries {
                let tf = tf as f32;
                let len_norm =
                    1.0 - self.b + self.b * self.doc_lens[doc as usize] as f32 / self.avgdl;
                scores[doc as usize] += p.idf * tf * (self.k1 + 1.0) / (tf + self.k1 * len_norm);
            }
        }
        scores
    }
}

/// Divide by the max score, yielding values in `[0, 1]`. A zero max maps
/// everything to zero rather than dividing by it.
pub fn normalize_scores(scores: &mut [f32]) {
    let max = scores.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        for s in scores.iter_mut() {
            *s /= max;
        }
    }
}
