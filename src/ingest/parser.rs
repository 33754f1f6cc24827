//! Chat-dump parser
//!
//! Reads one conversation export per JSON file:
//! `{ "meta": { "name", "type" }, "messages": [ { "sender",
//! "accountName", "timestamp", "content", "type" } ] }`

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::DateTime;
use serde::Deserialize;

use crate::error::{MnemoError, Result};
use crate::types::{ConversationKind, Message, MessageKind};

/// Conversation-level metadata from the dump header
#[derive(Debug, Clone)]
pub struct ConversationMeta {
    pub name: String,
    pub kind: ConversationKind,
}

#[derive(Deserialize)]
struct RawDump {
    #[serde(default)]
    meta: RawMeta,
    messages: Vec<RawMessage>,
}

#[derive(Deserialize, Default)]
struct RawMeta {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize)]
struct RawMessage {
    sender: String,
    #[serde(rename = "accountName")]
    display_name: String,
    timestamp: i64,
    #[serde(default)]
    content: String,
    #[serde(rename = "type")]
    kind: i64,
}

/// Load a conversation dump from `path`
pub fn load_conversation(path: impl AsRef<Path>) -> Result<(Vec<Message>, ConversationMeta)> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let dump: RawDump = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        MnemoError::InvalidInput(format!("malformed chat dump {}: {}", path.display(), e))
    })?;

    let messages = dump
        .messages
        .into_iter()
        .filter_map(|m| {
            DateTime::from_timestamp(m.timestamp, 0).map(|ts| Message {
                sender_id: m.sender,
                display_name: m.display_name,
                timestamp: ts,
                content: m.content,
                kind: MessageKind::from_code(m.kind),
            })
        })
        .collect();

    let meta = ConversationMeta {
        name: if dump.meta.name.is_empty() {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".to_string())
        } else {
            dump.meta.name
        },
        kind: ConversationKind::from_raw(&dump.meta.kind),
    };

    Ok((messages, meta))
}
