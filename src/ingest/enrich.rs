//! Session text enrichment
//!
//! Produces the two strings each session is embedded from:
//! - `content_text`: the dialogue itself, one `name: content` line per
//!   message
//! - `context_text`: a single metadata line carrying the local date, the
//!   time-of-day bucket, and the participant list

use chrono::{DateTime, Datelike, Local, Timelike, Utc};

use crate::types::Message;

/// Max characters of one message carried into `content_text`
const MESSAGE_CHAR_LIMIT: usize = 200;

/// Strip a bracketed suffix from a display name (`张三(工作)` → `张三`)
pub fn clean_name(name: &str) -> &str {
    let end = name
        .find('(')
        .into_iter()
        .chain(name.find('（'))
        .min()
        .unwrap_or(name.len());
    name[..end].trim()
}

/// Format the dialogue lines of `content_text`
pub fn format_dialogue(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for msg in messages {
        let name = clean_name(&msg.display_name);
        let mut content: String = msg.content.chars().take(MESSAGE_CHAR_LIMIT).collect();
        if msg.content.chars().count() > MESSAGE_CHAR_LIMIT {
            content.push_str("...");
        }
        lines.push(format!("{}: {}", name, content));
    }
    lines.join("\n")
}

/// Build the `context_text` metadata line. The time-of-day bucket uses
/// local hours: 0-11 morning, 12-17 afternoon, 18-23 evening.
pub fn context_line(start_ts: i64, participants: &[String]) -> String {
    let utc = DateTime::<Utc>::from_timestamp(start_ts, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let dt = utc.with_timezone(&Local);
    let period = match dt.hour() {
        0..=11 => "上午",
        12..=17 => "下午",
        _ => "晚上",
    };
    format!(
        "{}年{}月{}日{} 参与者: {}",
        dt.year(),
        dt.month(),
        dt.day(),
        period,
        participants.join(", ")
    )
}
