//! Core types for Mnemo

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Message kind as found in chat dumps. Only `Text` is retained downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Video,
    Sticker,
    System,
    Other,
}

impl MessageKind {
    /// Map the integer kind used by the dump format
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => MessageKind::Text,
            3 => MessageKind::Image,
            34 => MessageKind::Voice,
            43 => MessageKind::Video,
            47 => MessageKind::Sticker,
            10000 => MessageKind::System,
            _ => MessageKind::Other,
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable sender account identifier
    pub sender_id: String,
    /// Human-readable sender name
    pub display_name: String,
    /// UTC second-precision timestamp
    pub timestamp: DateTime<Utc>,
    /// Message body (UTF-8)
    pub content: String,
    /// Message kind
    pub kind: MessageKind,
}

impl Message {
    /// Epoch seconds of the message timestamp
    pub fn epoch(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

/// Conversation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    #[default]
    Private,
    Group,
}

impl ConversationKind {
    /// Lenient parse from dump metadata; anything unrecognized is private
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "group" | "chatroom" => ConversationKind::Group,
            _ => ConversationKind::Private,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Private => "private",
            ConversationKind::Group => "group",
        }
    }
}

/// Whether a session is a primary segment or a boundary-spanning bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Main,
    Overlap,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Main => "main",
            SessionKind::Overlap => "overlap",
        }
    }
}

/// Stable 16-byte session identifier over `kind|first_ts|last_ts`
pub fn session_id(kind: SessionKind, first_ts: i64, last_ts: i64) -> String {
    let digest = Sha256::digest(format!("{}|{}|{}", kind.as_str(), first_ts, last_ts));
    hex::encode(&digest[..16])
}

/// Everything the index needs to know about a session, minus the raw
/// message list. This is what the vector store persists per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub conversation_name: String,
    pub conversation_kind: ConversationKind,
    /// Sorted, deduplicated display names
    pub participants: Vec<String>,
    /// Epoch seconds of the first message
    pub start_ts: i64,
    /// Epoch seconds of the last message
    pub end_ts: i64,
    pub session_kind: SessionKind,
    /// Dialogue text, one `name: content` line per message
    pub content_text: String,
    /// Single metadata line (date, time-of-day, participants)
    pub context_text: String,
    /// Cached lexical tokens of `content_text`
    pub tokens: Vec<String>,
}

/// A coherent fragment of one conversation; the unit of indexing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub meta: SessionMeta,
    pub messages: Vec<Message>,
    /// Embedding of `content_text` (empty until generated)
    pub content_vector: Vec<f32>,
    /// Embedding of `context_text` (empty until generated)
    pub context_vector: Vec<f32>,
}

/// Metadata filter applied to search candidates. Filters compose by
/// conjunction at the call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Admits sessions whose `start_ts` lies in `[start, end]`
    TimeRange { start: i64, end: i64 },
    /// Admits sessions sharing at least one participant
    Participants(Vec<String>),
}

impl Filter {
    pub fn matches(&self, meta: &SessionMeta) -> bool {
        match self {
            Filter::TimeRange { start, end } => {
                *start <= meta.start_ts && meta.start_ts <= *end
            }
            Filter::Participants(people) => people
                .iter()
                .any(|p| meta.participants.iter().any(|m| m == p)),
        }
    }
}

/// Conjunction over a filter set; an empty set admits everything
pub fn matches_all(filters: &[Filter], meta: &SessionMeta) -> bool {
    filters.iter().all(|f| f.matches(meta))
}

/// User-facing recall kind, as accepted by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecallKind {
    #[default]
    Auto,
    Semantic,
    Temporal,
    People,
}

impl RecallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecallKind::Auto => "auto",
            RecallKind::Semantic => "semantic",
            RecallKind::Temporal => "temporal",
            RecallKind::People => "people",
        }
    }
}

impl std::str::FromStr for RecallKind {
    type Err = crate::error::MnemoError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(RecallKind::Auto),
            "semantic" => Ok(RecallKind::Semantic),
            "temporal" => Ok(RecallKind::Temporal),
            "people" => Ok(RecallKind::People),
            other => Err(crate::error::MnemoError::InvalidInput(format!(
                "unknown recall kind: {}",
                other
            ))),
        }
    }
}

/// Direction of a temporal association relative to a reference time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeDirection {
    Before,
    After,
    #[default]
    Around,
}

impl std::str::FromStr for TimeDirection {
    type Err = crate::error::MnemoError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "before" => Ok(TimeDirection::Before),
            "after" => Ok(TimeDirection::After),
            "around" => Ok(TimeDirection::Around),
            other => Err(crate::error::MnemoError::InvalidInput(format!(
                "unknown time direction: {}",
                other
            ))),
        }
    }
}

/// Resolved recall strategy. Advisory: it shapes explanation text and the
/// strategy label, never the numeric scoring.
#[derive(Debug, Clone, PartialEq)]
pub enum RecallStrategy {
    Semantic,
    Temporal {
        direction: TimeDirection,
        window_days: i64,
    },
    People {
        person: Option<String>,
    },
}

impl RecallStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            RecallStrategy::Semantic => "semantic",
            RecallStrategy::Temporal { .. } => "temporal",
            RecallStrategy::People { .. } => "people",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(start_ts: i64, participants: &[&str]) -> SessionMeta {
        SessionMeta {
            session_id: session_id(SessionKind::Main, start_ts, start_ts + 60),
            conversation_name: "测试群".to_string(),
            conversation_kind: ConversationKind::Group,
            participants: participants.iter().map(|s| s.to_string()).collect(),
            start_ts,
            end_ts: start_ts + 60,
            session_kind: SessionKind::Main,
            content_text: String::new(),
            context_text: String::new(),
            tokens: vec![],
        }
    }

    #[test]
    fn test_session_id_stable() {
        let a = session_id(SessionKind::Main, 1000, 2000);
        let b = session_id(SessionKind::Main, 1000, 2000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32); // 16 bytes hex
        assert_ne!(a, session_id(SessionKind::Overlap, 1000, 2000));
        assert_ne!(a, session_id(SessionKind::Main, 1000, 2001));
    }

    #[test]
    fn test_time_range_filter_inclusive() {
        let f = Filter::TimeRange { start: 1500, end: 3500 };
        assert!(!f.matches(&meta_with(1000, &["a"])));
        assert!(f.matches(&meta_with(1500, &["a"])));
        assert!(f.matches(&meta_with(3500, &["a"])));
        assert!(!f.matches(&meta_with(4000, &["a"])));
    }

    #[test]
    fn test_participants_filter_intersection() {
        let f = Filter::Participants(vec!["张三".to_string()]);
        assert!(f.matches(&meta_with(0, &["张三", "李四"])));
        assert!(!f.matches(&meta_with(0, &["李四"])));
    }

    #[test]
    fn test_filters_conjunction() {
        let meta = meta_with(2000, &["张三"]);
        let both = vec![
            Filter::TimeRange { start: 0, end: 3000 },
            Filter::Participants(vec!["张三".to_string()]),
        ];
        assert!(matches_all(&both, &meta));
        let disjoint = vec![
            Filter::TimeRange { start: 0, end: 1000 },
            Filter::Participants(vec!["张三".to_string()]),
        ];
        assert!(!matches_all(&disjoint, &meta));
        assert!(matches_all(&[], &meta));
    }

    #[test]
    fn test_recall_kind_parse() {
        assert_eq!("auto".parse::<RecallKind>().unwrap(), RecallKind::Auto);
        assert_eq!("People".parse::<RecallKind>().unwrap(), RecallKind::People);
        assert!("fuzzy".parse::<RecallKind>().is_err());
    }

    #[test]
    fn test_message_kind_codes() {
        assert_eq!(MessageKind::from_code(0), MessageKind::Text);
        assert_eq!(MessageKind::from_code(10000), MessageKind::System);
        assert_eq!(MessageKind::from_code(999), MessageKind::Other);
    }
}
