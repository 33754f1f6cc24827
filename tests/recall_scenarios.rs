//! End-to-end scenarios over the full recall stack
//!
//! Seeded flows covering segmentation boundaries, fusion behavior,
//! filters, the recall cache, and ANN/linear agreement.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mnemo::embedding::{DualVectorGenerator, Embedder, HashingEmbedder};
use mnemo::index::{squared_l2, AnnParams, FusionWeights, HnswGraph, HybridIndex, IndexConfig, SearchQuery};
use mnemo::ingest::{ConversationMeta, SegmentConfig, SessionBuilder};
use mnemo::recall::{RecallConfig, RecallRequest, RecallService};
use mnemo::store::{normalize_in_place, VectorStore};
use mnemo::tokenize::tokenize;
use mnemo::types::{
    session_id, ConversationKind, Filter, Message, MessageKind, SessionKind, SessionMeta,
};

const DIM: usize = 96;

fn conv() -> ConversationMeta {
    ConversationMeta { name: "产品讨论群".to_string(), kind: ConversationKind::Group }
}

fn msg_at(secs: i64, name: &str, content: &str) -> Message {
    Message {
        sender_id: name.to_string(),
        display_name: name.to_string(),
        timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        content: content.to_string(),
        kind: MessageKind::Text,
    }
}

fn meta(conv_name: &str, text: &str, ts: i64, participants: &[&str]) -> SessionMeta {
    SessionMeta {
        session_id: session_id(SessionKind::Main, ts, ts + 60),
        conversation_name: conv_name.to_string(),
        conversation_kind: ConversationKind::Group,
        participants: participants.iter().map(|s| s.to_string()).collect(),
        start_ts: ts,
        end_ts: ts + 60,
        session_kind: SessionKind::Main,
        content_text: text.to_string(),
        context_text: String::new(),
        tokens: tokenize(text),
    }
}

async fn service_over(
    entries: Vec<(&str, &str, i64, Vec<&str>)>,
    cache_ttl: Duration,
) -> RecallService {
    let embedder = Arc::new(HashingEmbedder::new(DIM));
    let mut store = VectorStore::new(DIM);
    for (conv_name, text, ts, participants) in entries {
        let content = embedder.embed(&[text.to_string()]).await.unwrap().remove(0);
        store
            .add(content, vec![0.0; DIM], meta(conv_name, text, ts, &participants))
            .unwrap();
    }
    let mut index = HybridIndex::new(store, IndexConfig::default());
    index.build_lexical();
    let config = RecallConfig { cache_ttl, ..RecallConfig::default() };
    RecallService::new(Arc::new(index), embedder, config)
}

// ----------------------------------------------------------------------------
// Segmentation boundaries: the cap, the drop rule, and the 2-hour
// overlap guard in one stream
// ----------------------------------------------------------------------------
#[test]
fn segmentation_cap_drop_and_overlap_guard() {
    let builder = SessionBuilder::new(SegmentConfig::default());

    // 25 messages at +5 min, a lone message 90 minutes later, another
    // 90-minute hole, then 4 more at +5 min
    let mut messages: Vec<Message> = (0..25).map(|i| msg_at(i * 300, "张三", &format!("早场{}", i))).collect();
    let lone_ts = 24 * 300 + 5400;
    messages.push(msg_at(lone_ts, "李四", "孤立消息"));
    let tail_start = lone_ts + 5400;
    for i in 0..4 {
        messages.push(msg_at(tail_start + i * 300, "王五", &format!("晚场{}", i)));
    }

    let sessions = builder.split(&messages, &conv());
    let mains: Vec<_> = sessions
        .iter()
        .filter(|s| s.meta.session_kind == SessionKind::Main)
        .collect();
    let overlaps: Vec<_> = sessions
        .iter()
        .filter(|s| s.meta.session_kind == SessionKind::Overlap)
        .collect();

    // Cap emits a main of 20; the remaining 5 survive as a second main;
    // the lone message is a dropped partial; the tail is a main of 4
    let sizes: Vec<usize> = mains.iter().map(|s| s.messages.len()).collect();
    assert_eq!(sizes, vec![20, 5, 4]);
    assert!(!sessions.iter().any(|s| s.messages.iter().any(|m| m.content == "孤立消息")));

    // Overlap exists across the 5-minute cap cut (gap <= 2 h); the
    // 180-minute hole between the second and third main suppresses the
    // other bridge
    assert_eq!(overlaps.len(), 1);
    assert_eq!(overlaps[0].messages.len(), 10);
    assert!(overlaps[0].messages.iter().any(|m| m.content == "早场19"));
    assert!(overlaps[0].messages.iter().any(|m| m.content == "早场20"));
}

// A 90-minute gap still gets its bridge (both neighbors >= 3, gap <= 2 h)
#[test]
fn overlap_spans_gap_boundary() {
    let builder = SessionBuilder::new(SegmentConfig::default());
    let mut messages: Vec<Message> =
        (0..4).map(|i| msg_at(i * 300, "张三", &format!("前{}", i))).collect();
    for i in 0..4 {
        messages.push(msg_at(900 + 5400 + i * 300, "李四", &format!("后{}", i)));
    }
    let sessions = builder.split(&messages, &conv());
    let overlaps: Vec<_> = sessions
        .iter()
        .filter(|s| s.meta.session_kind == SessionKind::Overlap)
        .collect();
    assert_eq!(overlaps.len(), 1);
    assert_eq!(overlaps[0].messages.len(), 8);
}

// ----------------------------------------------------------------------------
// A query term in zero documents: bm25 contributes nothing and the
// ranking reduces to pure vector cosine
// ----------------------------------------------------------------------------
#[tokio::test]
async fn unknown_terms_rank_by_vector_alone() {
    let embedder = HashingEmbedder::new(DIM);
    let texts = ["讨论项目预算".to_string(), "周末出去爬山".to_string()];
    let vectors = embedder.embed(&texts).await.unwrap();

    let mut store = VectorStore::new(DIM);
    for (i, (text, v)) in texts.iter().zip(vectors.iter()).enumerate() {
        store
            .add(v.clone(), vec![0.0; DIM], meta("群", text, 1_700_000_000 + i as i64, &["甲"]))
            .unwrap();
    }
    let mut index = HybridIndex::new(store, IndexConfig::default());
    index.build_lexical();

    // Query text shares no token with the corpus; vector points at doc 1
    let q = embedder.embed(&["山上风景".to_string()]).await.unwrap().remove(0);
    let hits = index
        .search(&SearchQuery {
            content_vector: &q,
            context_vector: None,
            text: "zzz不存在的词zzz",
            top_k: 2,
            filters: &[],
            weights: FusionWeights::default(),
        })
        .unwrap();

    assert!(hits.iter().all(|h| h.bm25 == 0.0));
    for h in &hits {
        assert!((h.hybrid - 0.5 * h.vector).abs() < 1e-6);
    }
}

// ----------------------------------------------------------------------------
// Dual-vector blend: identical content, opposite context; the query
// context decides the order, flipping it flips the order
// ----------------------------------------------------------------------------
#[test]
fn context_vector_decides_order_between_equal_content() {
    let mut content = vec![0.0f32; DIM];
    content[0] = 1.0;
    let mut ctx_up = vec![0.0f32; DIM];
    ctx_up[1] = 1.0;
    let mut ctx_down = vec![0.0f32; DIM];
    ctx_down[1] = -1.0;

    let mut store = VectorStore::new(DIM);
    store.add(content.clone(), ctx_up.clone(), meta("群", "一样的内容", 1, &["甲"])).unwrap();
    store.add(content.clone(), ctx_down.clone(), meta("群", "一样的内容", 2, &["乙"])).unwrap();
    let mut index = HybridIndex::new(store, IndexConfig::default());
    index.build_lexical();

    let search = |qctx: &[f32]| {
        index
            .search(&SearchQuery {
                content_vector: &content,
                context_vector: Some(qctx),
                text: "",
                top_k: 2,
                filters: &[],
                weights: FusionWeights::default(),
            })
            .unwrap()
            .first()
            .map(|h| h.index)
            .unwrap()
    };

    assert_eq!(search(&ctx_up), 0);
    assert_eq!(search(&ctx_down), 1);
}

// ----------------------------------------------------------------------------
// Time filter admits exactly the sessions inside the range
// ----------------------------------------------------------------------------
#[tokio::test]
async fn time_filter_admits_only_sessions_in_range() {
    let service = service_over(
        vec![
            ("群", "第一场讨论", 1000, vec!["甲"]),
            ("群", "第二场讨论", 2000, vec!["甲"]),
            ("群", "第三场讨论", 3000, vec!["甲"]),
            ("群", "第四场讨论", 4000, vec!["甲"]),
        ],
        Duration::from_secs(3600),
    )
    .await;

    let mut req = RecallRequest::new("讨论");
    req.min_relevance = 0.0;
    req.top_k = 10;
    req.time_range = Some((1500, 3500));
    let response = service.recall(&req).await.unwrap();

    let mut stamps: Vec<i64> = response.memories.iter().map(|m| m.timestamp).collect();
    stamps.sort_unstable();
    assert_eq!(stamps, vec![2000, 3000]);
}

// ----------------------------------------------------------------------------
// Cache: identical back-to-back calls return identical memories with
// a fresh request id, and the second call is faster
// ----------------------------------------------------------------------------
#[tokio::test]
async fn repeated_recall_is_cached_with_fresh_request_id() {
    let entries: Vec<(&str, String, i64, Vec<&str>)> = (0..200)
        .map(|i| {
            (
                "群",
                format!("第{}次会议讨论项目进展和预算安排", i),
                1_700_000_000 + i as i64 * 3600,
                vec!["张三", "李四"],
            )
        })
        .collect();
    let entries_ref: Vec<(&str, &str, i64, Vec<&str>)> = entries
        .iter()
        .map(|(c, t, ts, p)| (*c, t.as_str(), *ts, p.clone()))
        .collect();
    let service = service_over(entries_ref, Duration::from_secs(3600)).await;

    let mut req = RecallRequest::new("项目预算的讨论");
    req.min_relevance = 0.0;

    let first = service.recall(&req).await.unwrap();
    let second = service.recall(&req).await.unwrap();

    assert_ne!(first.request_id, second.request_id);
    assert_eq!(
        first.memories.iter().map(|m| &m.memory_id).collect::<Vec<_>>(),
        second.memories.iter().map(|m| &m.memory_id).collect::<Vec<_>>()
    );
    assert_eq!(first.recall_strategy, second.recall_strategy);
    assert!(
        second.processing_time_ms < first.processing_time_ms,
        "cached call took {:.3}ms vs {:.3}ms",
        second.processing_time_ms,
        first.processing_time_ms
    );
}

// An expired cache entry is recomputed, not served
#[tokio::test]
async fn expired_cache_entry_is_recomputed() {
    let service = service_over(
        vec![("群", "只有一条讨论", 1_700_000_000, vec!["甲"])],
        Duration::from_millis(0),
    )
    .await;
    let mut req = RecallRequest::new("讨论");
    req.min_relevance = 0.0;

    let first = service.recall(&req).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = service.recall(&req).await.unwrap();
    assert_eq!(first.total_count, second.total_count);
}

// ----------------------------------------------------------------------------
// ANN/linear agreement on random unit vectors
// ----------------------------------------------------------------------------

fn random_unit(rng: &mut SmallRng, dim: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect();
    normalize_in_place(&mut v);
    v
}

fn agreement_run(n: usize, dim: usize, queries: usize) -> (f64, f64) {
    let mut rng = SmallRng::seed_from_u64(0xa6);
    let vectors: Vec<Vec<f32>> = (0..n).map(|_| random_unit(&mut rng, dim)).collect();
    let graph = HnswGraph::build(&vectors, &AnnParams::default());

    let mut jaccard_sum = 0.0f64;
    let mut top1_matches = 0usize;
    for _ in 0..queries {
        let q = random_unit(&mut rng, dim);

        let mut exact: Vec<(f32, u32)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (squared_l2(&q, v), i as u32))
            .collect();
        exact.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let exact10: std::collections::HashSet<u32> =
            exact.iter().take(10).map(|&(_, i)| i).collect();

        let approx: Vec<u32> = graph.search(&vectors, &q, 10, 64).into_iter().map(|(i, _)| i).collect();
        let approx10: std::collections::HashSet<u32> = approx.iter().copied().collect();

        let inter = exact10.intersection(&approx10).count() as f64;
        let union = exact10.union(&approx10).count() as f64;
        jaccard_sum += inter / union;
        if approx.first() == exact.first().map(|&(_, i)| i).as_ref() {
            top1_matches += 1;
        }
    }
    (jaccard_sum / queries as f64, top1_matches as f64 / queries as f64)
}

#[test]
fn ann_linear_agreement_smoke() {
    let (jaccard, top1) = agreement_run(1500, 32, 60);
    assert!(jaccard >= 0.9, "mean top-10 jaccard {:.3}", jaccard);
    assert!(top1 >= 0.9, "top-1 agreement {:.2}", top1);
}

/// The full-size agreement run; expensive, so opt-in:
/// `cargo test --release --test recall_scenarios -- --ignored`
#[test]
#[ignore]
fn ann_linear_agreement_full() {
    let (jaccard, top1) = agreement_run(10_000, 768, 1000);
    assert!(jaccard >= 0.9, "mean top-10 jaccard {:.3}", jaccard);
    assert!(top1 >= 0.9, "top-1 agreement {:.2}", top1);
}

// ----------------------------------------------------------------------------
// Recall over a genuinely ingested conversation, end to end
// ----------------------------------------------------------------------------
#[tokio::test]
async fn end_to_end_ingest_and_recall() {
    let builder = SessionBuilder::new(SegmentConfig::default());
    let lines = [
        "下季度的AI项目预算需要重新排期",
        "我觉得模型训练的开销是大头",
        "那就先把数据管线的预算砍一半",
        "周五之前给我一版修订的方案",
        "好的，我会同步给设计团队",
    ];
    let messages: Vec<Message> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| msg_at(i as i64 * 120, if i % 2 == 0 { "张三" } else { "李四" }, line))
        .collect();

    let mut sessions = builder.split(&messages, &conv());
    assert_eq!(sessions.len(), 1);

    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(DIM));
    let generator = DualVectorGenerator::new(embedder.clone());
    generator.generate(&mut sessions).await.unwrap();

    let mut store = VectorStore::new(DIM);
    for s in sessions {
        store.add(s.content_vector, s.context_vector, s.meta).unwrap();
    }
    let mut index = HybridIndex::new(store, IndexConfig::default());
    index.build_lexical();
    let service = RecallService::new(Arc::new(index), embedder, RecallConfig::default());

    let mut req = RecallRequest::new("AI项目的预算讨论");
    req.min_relevance = 0.0;
    let response = service.recall(&req).await.unwrap();

    assert_eq!(response.total_count, 1);
    let memory = &response.memories[0];
    assert!(memory.content.contains("张三: "));
    assert!(memory.participants.contains(&"张三".to_string()));
    assert_eq!(response.associations.topics, vec!["产品讨论群".to_string()]);

    // Participants filter applies through the plain search path too
    let hits = service
        .search("预算", 5, &[Filter::Participants(vec!["王五".to_string()])])
        .await
        .unwrap();
    assert_eq!(hits.total_count, 0);
}
