//! Request payloads for the HTTP surface
//!
//! Response bodies are the recall-service result types serialized as-is.

use serde::Deserialize;

use crate::types::Filter;

fn default_top_k() -> usize {
    5
}

fn default_wide_top_k() -> usize {
    10
}

fn default_min_relevance() -> f32 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_direction() -> String {
    "around".to_string()
}

fn default_window_days() -> i64 {
    7
}

#[derive(Debug, Deserialize)]
pub struct TimeRangeDto {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Deserialize)]
pub struct RecallRequestDto {
    pub context: String,
    #[serde(default = "RecallRequestDto::default_kind")]
    pub recall_type: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
    #[serde(default)]
    pub time_range: Option<TimeRangeDto>,
}

impl RecallRequestDto {
    fn default_kind() -> String {
        "auto".to_string()
    }
}

#[derive(Debug, Deserialize)]
pub struct TopicAssociationDto {
    pub topic: String,
    #[serde(default = "default_wide_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
}

#[derive(Debug, Deserialize)]
pub struct PeopleAssociationDto {
    pub person: String,
    #[serde(default = "default_wide_top_k")]
    pub top_k: usize,
    #[serde(default = "default_true")]
    pub include_mentions: bool,
}

#[derive(Debug, Deserialize)]
pub struct TimeAssociationDto {
    pub reference_time: i64,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default = "default_window_days")]
    pub time_window: i64,
    #[serde(default = "default_wide_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequestDto {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_request_defaults() {
        let dto: RecallRequestDto = serde_json::from_str(r#"{"context": "明天的会议"}"#).unwrap();
        assert_eq!(dto.recall_type, "auto");
        assert_eq!(dto.top_k, 5);
        assert!((dto.min_relevance - 0.3).abs() < 1e-6);
        assert!(dto.time_range.is_none());
    }

    #[test]
    fn test_search_request_filters() {
        let dto: SearchRequestDto = serde_json::from_str(
            r#"{
              "query": "项目",
              "filters": [
                { "time_range": { "start": 0, "end": 100 } },
                { "participants": ["张三"] }
              ]
            }"#,
        )
        .unwrap();
        assert_eq!(dto.filters.len(), 2);
    }

    #[test]
    fn test_time_association_defaults() {
        let dto: TimeAssociationDto =
            serde_json::from_str(r#"{"reference_time": 1700000000}"#).unwrap();
        assert_eq!(dto.direction, "around");
        assert_eq!(dto.time_window, 7);
        assert_eq!(dto.top_k, 10);
    }
}
