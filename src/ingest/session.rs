//! Session segmentation
//!
//! Three-phase deterministic slicing of one conversation's message
//! stream:
//! 1. batching on time gaps and a size cap, dropping undersized batches
//! 2. one main session per batch
//! 3. boundary overlaps bridging consecutive batches whose gap is small
//!    enough, so context survives the cut

use std::collections::BTreeSet;

use crate::tokenize::tokenize;
use crate::types::{session_id, Message, MessageKind, Session, SessionKind, SessionMeta};

use super::enrich::{context_line, format_dialogue};
use super::parser::ConversationMeta;

/// Segmentation parameters
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Gap that closes the current batch
    pub time_gap_secs: i64,
    /// Batches smaller than this are dropped
    pub min_msgs: usize,
    /// Batches never grow past this
    pub max_msgs: usize,
    /// Messages taken from each side of a boundary
    pub overlap_window: usize,
    /// No overlap is built across a gap longer than this
    pub overlap_max_gap_secs: i64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            time_gap_secs: 30 * 60,
            min_msgs: 3,
            max_msgs: 20,
            overlap_window: 5,
            overlap_max_gap_secs: 2 * 60 * 60,
        }
    }
}

/// Deterministic session builder
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SegmentConfig,
}

impl SessionBuilder {
    pub fn new(config: SegmentConfig) -> Self {
        Self { config }
    }

    /// Slice a conversation into main and overlap sessions. Empty input
    /// yields zero sessions; there is no failure mode.
    pub fn split(&self, messages: &[Message], conv: &ConversationMeta) -> Vec<Session> {
        let batches = self.batch(messages);

        let mut sessions: Vec<Session> = batches
            .iter()
            .map(|batch| self.build_session(batch.clone(), conv, SessionKind::Main))
            .collect();

        // Phase 3: boundary overlaps
        let w = self.config.overlap_window;
        for pair in batches.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let gap = next[0].epoch() - prev[prev.len() - 1].epoch();
            if gap > self.config.overlap_max_gap_secs {
                continue;
            }
            let mut bridge: Vec<Message> =
                prev[prev.len().saturating_sub(w)..].to_vec();
            bridge.extend_from_slice(&next[..w.min(next.len())]);
            if bridge.len() >= self.config.min_msgs {
                sessions.push(self.build_session(bridge, conv, SessionKind::Overlap));
            }
        }

        tracing::debug!(
            conversation = %conv.name,
            mains = batches.len(),
            total = sessions.len(),
            "conversation segmented"
        );
        sessions
    }

    /// Phase 1: admit text messages with content, cutting on gaps and the
    /// size cap. Undersized batches are dropped, never merged across a
    /// gap.
    fn batch(&self, messages: &[Message]) -> Vec<Vec<Message>> {
        let mut batches = Vec::new();
        let mut current: Vec<Message> = Vec::new();

        for msg in messages {
            if msg.kind != MessageKind::Text || msg.content.trim().is_empty() {
                continue;
            }

            if let Some(last) = current.last() {
                let gap = msg.epoch() - last.epoch();
                if gap > self.config.time_gap_secs || current.len() >= self.config.max_msgs {
                    if current.len() >= self.config.min_msgs {
                        batches.push(std::mem::take(&mut current));
                    } else {
                        current.clear();
                    }
                }
            }
            current.push(msg.clone());
        }

        if current.len() >= self.config.min_msgs {
            batches.push(current);
        }
        batches
    }

    fn build_session(
        &self,
        messages: Vec<Message>,
        conv: &ConversationMeta,
        kind: SessionKind,
    ) -> Session {
        let start_ts = messages[0].epoch();
        let end_ts = messages[messages.len() - 1].epoch();

        let participants: Vec<String> = messages
            .iter()
            .map(|m| m.display_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let content_text = format_dialogue(&messages);
        let context_text = context_line(start_ts, &participants);
        let tokens = tokenize(&content_text);

        Session {
            meta: SessionMeta {
                session_id: session_id(kind, start_ts, end_ts),
                conversation_name: conv.name.clone(),
                conversation_kind: conv.kind,
                participants,
                start_ts,
                end_ts,
                session_kind: kind,
                content_text,
                context_text,
                tokens,
            },
            messages,
            content_vector: Vec::new(),
            context_vector: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationKind;
    use chrono::{TimeZone, Utc};

    fn conv() -> ConversationMeta {
        ConversationMeta {
            name: "测试会话".to_string(),
            kind: ConversationKind::Private,
        }
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

    fn stream(offsets: &[i64]) -> Vec<Message> {
        offsets
            .iter()
            .enumerate()
            .map(|(i, &s)| msg_at(s, if i % 2 == 0 { "张三" } else { "李四" }, &format!("消息{}", i)))
            .collect()
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let builder = SessionBuilder::default();
        assert!(builder.split(&[], &conv()).is_empty());
    }

    #[test]
    fn test_non_text_and_empty_messages_skipped() {
        let builder = SessionBuilder::default();
        let mut messages = stream(&[0, 60, 120]);
        messages[1].kind = MessageKind::Image;
        messages.push(msg_at(180, "张三", "   "));
        messages.push(msg_at(240, "李四", "收到"));

        let sessions = builder.split(&messages, &conv());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages.len(), 3);
    }

    #[test]
    fn test_gap_splits_and_small_batch_dropped() {
        // 3 messages, a 90-minute hole, then 2 stragglers (dropped)
        let builder = SessionBuilder::default();
        let offsets = [0, 300, 600, 600 + 5400, 600 + 5400 + 60];
        let sessions = builder.split(&stream(&offsets), &conv());
        let mains: Vec<_> = sessions
            .iter()
            .filter(|s| s.meta.session_kind == SessionKind::Main)
            .collect();
        assert_eq!(mains.len(), 1);
        assert_eq!(mains[0].messages.len(), 3);
    }

    #[test]
    fn test_size_cap_and_boundary_overlap() {
        // 25 messages at 5-minute spacing: cap emits a main of 20, the
        // remaining 5 become the second main, and one overlap bridges the
        // cut (gap 5 min <= 2 h)
        let builder = SessionBuilder::default();
        let offsets: Vec<i64> = (0..25).map(|i| i * 300).collect();
        let sessions = builder.split(&stream(&offsets), &conv());

        let mains: Vec<_> = sessions
            .iter()
            .filter(|s| s.meta.session_kind == SessionKind::Main)
            .collect();
        let overlaps: Vec<_> = sessions
            .iter()
            .filter(|s| s.meta.session_kind == SessionKind::Overlap)
            .collect();

        assert_eq!(mains.len(), 2);
        assert_eq!(mains[0].messages.len(), 20);
        assert_eq!(mains[1].messages.len(), 5);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].messages.len(), 10);

        // The bridge is the last 5 of the first main plus the first 5 of
        // the second
        let bridge_ids: Vec<String> =
            overlaps[0].messages.iter().map(|m| m.content.clone()).collect();
        assert_eq!(bridge_ids[0], "消息15");
        assert_eq!(bridge_ids[9], "消息24");
    }

    #[test]
    fn test_overlap_suppressed_across_long_gap() {
        // Two mains separated by 3 hours: no overlap
        let builder = SessionBuilder::default();
        let offsets = [0, 60, 120, 10800 + 120, 10800 + 180, 10800 + 240];
        let sessions = builder.split(&stream(&offsets), &conv());
        assert_eq!(
            sessions.iter().filter(|s| s.meta.session_kind == SessionKind::Overlap).count(),
            0
        );
        assert_eq!(
            sessions.iter().filter(|s| s.meta.session_kind == SessionKind::Main).count(),
            2
        );
    }

    #[test]
    fn test_overlap_emitted_within_two_hours() {
        // 90-minute gap: main sessions split, overlap still built
        let builder = SessionBuilder::default();
        let offsets = [0, 60, 120, 5400 + 120, 5400 + 180, 5400 + 240];
        let sessions = builder.split(&stream(&offsets), &conv());
        let overlaps: Vec<_> = sessions
            .iter()
            .filter(|s| s.meta.session_kind == SessionKind::Overlap)
            .collect();
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].messages.len(), 6);
    }

    #[test]
    fn test_session_metadata_populated() {
        let builder = SessionBuilder::default();
        let sessions = builder.split(&stream(&[0, 60, 120]), &conv());
        let meta = &sessions[0].meta;
        assert_eq!(meta.conversation_name, "测试会话");
        assert_eq!(meta.participants, vec!["张三".to_string(), "李四".to_string()]);
        assert!(meta.start_ts <= meta.end_ts);
        assert!(!meta.content_text.is_empty());
        assert!(meta.context_text.contains("参与者"));
        assert!(!meta.tokens.is_empty());
        assert_eq!(meta.session_id.len(), 32);
    }

    #[test]
    fn test_messages_sorted_and_disjoint_mains() {
        let builder = SessionBuilder::default();
        let offsets: Vec<i64> = (0..45).map(|i| i * 300).collect();
        let sessions = builder.split(&stream(&offsets), &conv());
        let mains: Vec<_> = sessions
            .iter()
            .filter(|s| s.meta.session_kind == SessionKind::Main)
            .collect();

        for s in &mains {
            assert!(s.messages.windows(2).all(|p| p[0].epoch() <= p[1].epoch()));
            assert!(s.messages.len() >= 3 && s.messages.len() <= 20);
        }
        // Disjoint membership across mains
        let mut seen = std::collections::HashSet::new();
        for s in &mains {
            for m in &s.messages {
                assert!(seen.insert(m.content.clone()), "message shared between mains");
            }
        }
    }
}
