//! Memory recall orchestration
//!
//! Turns a free-form cue into index invocations: strategy classification,
//! query embedding, candidate retrieval, relevance cutoff, per-result
//! explanation, association extraction, and a TTL cache in front of the
//! whole thing. One cue can surface several related memories, each with
//! the reason it came up.

mod cache;

pub use cache::{CachedRecall, RecallCache};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::{MnemoError, Result};
use crate::index::{FusionWeights, HybridIndex, SearchHit, SearchQuery};
use crate::types::{Filter, RecallKind, RecallStrategy, TimeDirection};

/// Recall behavior knobs
#[derive(Debug, Clone)]
pub struct RecallConfig {
    pub default_top_k: usize,
    /// Upper bound accepted for `top_k`
    pub max_top_k: usize,
    pub default_min_relevance: f32,
    pub cache_ttl: Duration,
    /// Normalized BM25 above this adds the keyword-match reason
    pub keyword_reason_threshold: f32,
    /// Content cosine above this adds the semantic-similarity reason
    pub semantic_reason_threshold: f32,
    /// Ask the index for this multiple of `top_k` before the cutoff
    pub candidate_multiplier: usize,
    pub weights: FusionWeights,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 20,
            default_min_relevance: 0.3,
            cache_ttl: Duration::from_secs(3600),
            keyword_reason_threshold: 0.5,
            semantic_reason_threshold: 0.7,
            candidate_multiplier: 2,
            weights: FusionWeights::default(),
        }
    }
}

/// One recall invocation
#[derive(Debug, Clone)]
pub struct RecallRequest {
    pub context: String,
    pub kind: RecallKind,
    pub top_k: usize,
    pub min_relevance: f32,
    /// Inclusive epoch-second range on session start times
    pub time_range: Option<(i64, i64)>,
}

impl RecallRequest {
    pub fn new(context: impl Into<String>) -> Self {
        let defaults = RecallConfig::default();
        Self {
            context: context.into(),
            kind: RecallKind::Auto,
            top_k: defaults.default_top_k,
            min_relevance: defaults.default_min_relevance,
            time_range: None,
        }
    }
}

/// One recalled memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub memory_id: String,
    pub content: String,
    pub relevance_score: f32,
    pub recall_reason: String,
    pub timestamp: i64,
    pub conversation_name: String,
    pub participants: Vec<String>,
}

/// Cross-memory aggregates over the hit set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Associations {
    pub people: Vec<String>,
    pub topics: Vec<String>,
    pub time_context: Option<String>,
}

/// Full recall response
#[derive(Debug, Clone, Serialize)]
pub struct RecallResponse {
    pub request_id: Uuid,
    pub memories: Vec<MemoryHit>,
    pub total_count: usize,
    pub associations: Associations,
    pub recall_strategy: String,
    pub processing_time_ms: f64,
}

/// `recall_by_topic` result
#[derive(Debug, Clone, Serialize)]
pub struct TopicAssociations {
    pub topic: String,
    pub memories: Vec<MemoryHit>,
    pub total_count: usize,
}

/// `recall_by_people` result
#[derive(Debug, Clone, Serialize)]
pub struct PeopleAssociations {
    pub person: String,
    pub memories: Vec<MemoryHit>,
    pub total_count: usize,
}

/// `recall_by_time` result
#[derive(Debug, Clone, Serialize)]
pub struct TimeAssociations {
    pub reference_time: i64,
    pub direction: TimeDirection,
    pub memories: Vec<MemoryHit>,
    pub total_count: usize,
}

/// Plain hybrid-search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub results: Vec<MemoryHit>,
    pub total_count: usize,
}

/// Store statistics for `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_memories: usize,
    pub total_conversations: usize,
    pub date_range: DateRange,
    pub vector_dimension: usize,
    pub index_backend: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateRange {
    pub earliest: i64,
    pub latest: i64,
}

/// The recall service: an immutable handle built once at startup and
/// shared across request handlers.
pub struct RecallService {
    index: Arc<HybridIndex>,
    embedder: Arc<dyn Embedder>,
    cache: RecallCache,
    config: RecallConfig,
}

impl RecallService {
    pub fn new(index: Arc<HybridIndex>, embedder: Arc<dyn Embedder>, config: RecallConfig) -> Self {
        let cache = RecallCache::new(config.cache_ttl);
        Self { index, embedder, cache, config }
    }

    pub fn index(&self) -> &HybridIndex {
        &self.index
    }

    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    /// Core entry point: associate the cue with stored memories
    pub async fn recall(&self, req: &RecallRequest) -> Result<RecallResponse> {
        let started = Instant::now();
        self.validate(req)?;

        let key = RecallCache::fingerprint(&req.context, req.kind.as_str(), req.top_k);
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(key = %&key[..16], "recall cache hit");
            return Ok(Self::respond(cached, started));
        }

        let strategy = self.resolve_strategy(req);
        let query_vector = self.embed_context(&req.context).await?;

        let filters: Vec<Filter> = req
            .time_range
            .map(|(start, end)| vec![Filter::TimeRange { start, end }])
            .unwrap_or_default();

        let hits = self.index.search(&SearchQuery {
            content_vector: &query_vector,
            context_vector: None,
            text: &req.context,
            top_k: req.top_k * self.config.candidate_multiplier,
            filters: &filters,
            weights: self.config.weights,
        })?;

        let memories: Vec<MemoryHit> = hits
            .into_iter()
            .filter(|h| h.hybrid >= req.min_relevance)
            .take(req.top_k)
            .map(|h| self.to_memory(&h, &strategy))
            .collect();

        let associations = extract_associations(&memories);
        let payload = CachedRecall {
            memories,
            associations,
            strategy: strategy.label().to_string(),
        };
        self.cache.insert(key, payload.clone());
        Ok(Self::respond(payload, started))
    }

    /// Find memories tied to a topic
    pub async fn recall_by_topic(
        &self,
        topic: &str,
        top_k: usize,
        min_relevance: f32,
    ) -> Result<TopicAssociations> {
        let req = RecallRequest {
            context: format!("关于{}的讨论", topic),
            kind: RecallKind::Semantic,
            top_k,
            min_relevance,
            time_range: None,
        };
        let result = self.recall(&req).await?;
        Ok(TopicAssociations {
            topic: topic.to_string(),
            total_count: result.memories.len(),
            memories: result.memories,
        })
    }

    /// Find memories tied to a person. With `include_mentions` off, only
    /// sessions the person actually took part in survive.
    pub async fn recall_by_people(
        &self,
        person: &str,
        top_k: usize,
        include_mentions: bool,
    ) -> Result<PeopleAssociations> {
        let req = RecallRequest {
            context: format!("与{}的对话或提到{}的讨论", person, person),
            kind: RecallKind::People,
            top_k,
            min_relevance: self.config.default_min_relevance,
            time_range: None,
        };
        let result = self.recall(&req).await?;
        let mut memories = result.memories;
        if !include_mentions {
            memories.retain(|m| m.participants.iter().any(|p| p == person));
        }
        Ok(PeopleAssociations {
            person: person.to_string(),
            total_count: memories.len(),
            memories,
        })
    }

    /// Find memories near a reference time
    pub async fn recall_by_time(
        &self,
        reference_time: i64,
        direction: TimeDirection,
        window_days: i64,
        top_k: usize,
    ) -> Result<TimeAssociations> {
        const DAY: i64 = 86_400;
        let window = window_days * DAY;
        let (start, end) = match direction {
            TimeDirection::Before => (reference_time - window, reference_time),
            TimeDirection::After => (reference_time, reference_time + window),
            TimeDirection::Around => (reference_time - window, reference_time + window),
        };

        let req = RecallRequest {
            context: format!("在 {} 前后的对话", local_date(reference_time)),
            kind: RecallKind::Temporal,
            top_k,
            min_relevance: self.config.default_min_relevance,
            time_range: Some((start, end)),
        };
        let result = self.recall(&req).await?;
        Ok(TimeAssociations {
            reference_time,
            direction,
            total_count: result.memories.len(),
            memories: result.memories,
        })
    }

    /// Plain hybrid search without classification, caching, or
    /// aggregation
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &[Filter],
    ) -> Result<SearchOutcome> {
        if top_k == 0 || top_k > self.config.max_top_k {
            return Err(MnemoError::InvalidInput(format!(
                "top_k must be between 1 and {}",
                self.config.max_top_k
            )));
        }
        let query_vector = self.embed_context(query).await?;
        let hits = self.index.search(&SearchQuery {
            content_vector: &query_vector,
            context_vector: None,
            text: query,
            top_k,
            filters,
            weights: self.config.weights,
        })?;

        let results: Vec<MemoryHit> = hits
            .iter()
            .map(|h| {
                let mut m = self.to_memory(h, &RecallStrategy::Semantic);
                m.recall_reason = "keyword match".to_string();
                m
            })
            .collect();
        Ok(SearchOutcome {
            query: query.to_string(),
            total_count: results.len(),
            results,
        })
    }

    /// Corpus statistics
    pub fn stats(&self) -> StoreStats {
        let store = self.index.store();
        let metadata = store.metadata();
        let earliest = metadata.iter().map(|m| m.start_ts).min().unwrap_or(0);
        let latest = metadata.iter().map(|m| m.start_ts).max().unwrap_or(0);
        let conversations: BTreeSet<&str> =
            metadata.iter().map(|m| m.conversation_name.as_str()).collect();
        StoreStats {
            total_memories: store.len(),
            total_conversations: conversations.len(),
            date_range: DateRange { earliest, latest },
            vector_dimension: store.dimension(),
            index_backend: if self.index.ann_active() { "hnsw" } else { "linear" }.to_string(),
        }
    }

    fn validate(&self, req: &RecallRequest) -> Result<()> {
        if req.top_k == 0 || req.top_k > self.config.max_top_k {
            return Err(MnemoError::InvalidInput(format!(
                "top_k must be between 1 and {}",
                self.config.max_top_k
            )));
        }
        if !(0.0..=1.0).contains(&req.min_relevance) {
            return Err(MnemoError::InvalidInput(
                "min_relevance must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    async fn embed_context(&self, context: &str) -> Result<Vec<f32>> {
        let texts = [context.to_string()];
        let mut vectors = self.embedder.embed(&texts).await?;
        if vectors.is_empty() {
            return Err(MnemoError::Provider(
                "provider returned no vector for the query".to_string(),
            ));
        }
        Ok(vectors.swap_remove(0))
    }

    /// Resolve the advisory strategy. Classification only shapes the
    /// explanation text and label, never the scoring.
    fn resolve_strategy(&self, req: &RecallRequest) -> RecallStrategy {
        match req.kind {
            RecallKind::Auto => classify(&req.context),
            RecallKind::Semantic => RecallStrategy::Semantic,
            RecallKind::Temporal => RecallStrategy::Temporal {
                direction: TimeDirection::Around,
                window_days: 7,
            },
            RecallKind::People => RecallStrategy::People { person: None },
        }
    }

    fn to_memory(&self, hit: &SearchHit, strategy: &RecallStrategy) -> MemoryHit {
        MemoryHit {
            memory_id: memory_id(&hit.meta.conversation_name, hit.meta.start_ts),
            content: hit.meta.content_text.clone(),
            relevance_score: hit.hybrid,
            recall_reason: self.reason(hit, strategy),
            timestamp: hit.meta.start_ts,
            conversation_name: hit.meta.conversation_name.clone(),
            participants: hit.meta.participants.clone(),
        }
    }

    /// Explain why a memory surfaced
    fn reason(&self, hit: &SearchHit, strategy: &RecallStrategy) -> String {
        let mut reasons: Vec<&str> = Vec::new();
        if hit.bm25 > self.config.keyword_reason_threshold {
            reasons.push("keyword match");
        }
        if hit.content > self.config.semantic_reason_threshold {
            reasons.push("semantic similarity");
        }
        match strategy {
            RecallStrategy::People { .. } => reasons.push("related people"),
            RecallStrategy::Temporal { .. } => reasons.push("temporally adjacent"),
            RecallStrategy::Semantic => {
                if reasons.is_empty() {
                    reasons.push("topically related");
                }
            }
        }
        let text = if reasons.is_empty() {
            "combined match".to_string()
        } else {
            reasons.join(" + ")
        };
        format!("{} (relevance: {:.2})", text, hit.hybrid)
    }

    fn respond(payload: CachedRecall, started: Instant) -> RecallResponse {
        RecallResponse {
            request_id: Uuid::new_v4(),
            total_count: payload.memories.len(),
            memories: payload.memories,
            associations: payload.associations,
            recall_strategy: payload.strategy,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Keyword heuristics for the auto strategy
fn classify(context: &str) -> RecallStrategy {
    let lower = context.to_lowercase();
    const WHO_WORDS: [&str; 3] = ["谁", "who", "人"];
    const WHEN_WORDS: [&str; 4] = ["什么时候", "when", "之前", "之后"];

    if WHO_WORDS.iter().any(|w| lower.contains(w)) {
        RecallStrategy::People { person: None }
    } else if WHEN_WORDS.iter().any(|w| lower.contains(w)) {
        RecallStrategy::Temporal { direction: TimeDirection::Around, window_days: 7 }
    } else {
        RecallStrategy::Semantic
    }
}

/// Stable per-memory identifier over conversation and start time
fn memory_id(conversation_name: &str, start_ts: i64) -> String {
    let digest = Sha256::digest(format!("{}_{}", conversation_name, start_ts));
    hex::encode(digest)[..16].to_string()
}

fn local_date(ts: i64) -> String {
    let utc = DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    utc.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

/// Aggregate shared people, topics, and the time span of a hit set
fn extract_associations(memories: &[MemoryHit]) -> Associations {
    let people: BTreeSet<String> = memories
        .iter()
        .flat_map(|m| m.participants.iter().cloned())
        .collect();

    let mut topics: Vec<String> = Vec::new();
    for m in memories {
        if !topics.contains(&m.conversation_name) {
            topics.push(m.conversation_name.clone());
        }
        if topics.len() == 5 {
            break;
        }
    }

    let time_context = if memories.is_empty() {
        None
    } else {
        let earliest = memories.iter().map(|m| m.timestamp).min().unwrap_or(0);
        let latest = memories.iter().map(|m| m.timestamp).max().unwrap_or(0);
        let (d1, d2) = (local_date(earliest), local_date(latest));
        Some(if d1 == d2 {
            format!("all on {}", d1)
        } else {
            format!("from {} to {}", d1, d2)
        })
    };

    Associations {
        people: people.into_iter().collect(),
        topics,
        time_context,
    }
}
