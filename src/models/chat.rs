// src/models/chat.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// One conversational turn. Either side may be missing in rows persisted by
/// older builds; turns with neither are dropped on replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

impl Turn {
    pub fn is_empty(&self) -> bool {
        self.query.is_none() && self.response.is_none()
    }
}

const KEY_PREFIX: &str = "message";
const PREVIEW_CHARS: usize = 50;

fn key_number(key: &str) -> u32 {
    key.strip_prefix(KEY_PREFIX)
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(0)
}

/// The `messageN`-keyed log stored in the chats table. Storage order is
/// meaningless; the numeric key suffix assigned at append time is the
/// ordering, so every replay re-sorts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    entries: HashMap<String, Turn>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the stored JSON column. Anything that is not a JSON object of
    /// turns (corrupt text, a bare array, null) becomes an empty log.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<HashMap<String, Turn>>(raw) {
            Ok(entries) => Self { entries },
            Err(_) => Self::default(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sorted_entries(&self) -> Vec<(&String, &Turn)> {
        let mut keyed: Vec<(&String, &Turn)> = self.entries.iter().collect();
        keyed.sort_by_key(|(key, _)| key_number(key));
        keyed
    }

    /// Turns in ascending key order, empty turns skipped.
    pub fn ordered_turns(&self) -> Vec<&Turn> {
        self.sorted_entries()
            .into_iter()
            .map(|(_, turn)| turn)
            .filter(|turn| !turn.is_empty())
            .collect()
    }

    fn next_key_number(&self) -> u32 {
        self.entries
            .keys()
            .map(|key| key_number(key))
            .max()
            .map(|n| n + 1)
            .unwrap_or(1)
    }

    /// Append a completed turn under the next sequential key.
    pub fn append(&mut self, query: impl Into<String>, response: impl Into<String>) {
        let key = format!("{}{}", KEY_PREFIX, self.next_key_number());
        self.entries.insert(
            key,
            Turn {
                query: Some(query.into()),
                response: Some(response.into()),
            },
        );
    }

    /// The first turn's query, truncated for the history list.
    pub fn preview(&self) -> Option<String> {
        let (_, first) = self.sorted_entries().into_iter().next()?;
        let query = first.query.as_deref()?;
        if query.chars().count() > PREVIEW_CHARS {
            let head: String = query.chars().take(PREVIEW_CHARS).collect();
            Some(format!("{head}..."))
        } else {
            Some(query.to_string())
        }
    }
}

/// A chats-table row as stored.
#[derive(Debug, Clone, FromRow)]
pub struct ChatRow {
    pub chat_id: i32,
    pub user_id: i32,
    pub messages: String,
    pub disease: Option<String>,
    pub symptoms: Option<String>,
    pub confidence: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatRow {
    /// Stored symptom names, parsed defensively: NULL, corrupt JSON, or a
    /// non-array all become an empty set.
    pub fn symptom_names(&self) -> Vec<String> {
        self.symptoms
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default()
    }

    pub fn message_log(&self) -> MessageLog {
        MessageLog::parse(&self.messages)
    }
}

#[derive(Debug, Deserialize)]
pub struct SymptomsRequest {
    pub symptoms: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub disease: String,
    pub confidence: String,
    pub symptoms_count: usize,
    pub chat_id: i32,
}

#[derive(Debug, Serialize)]
pub struct SymptomsResponse {
    pub symptoms: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserPrompt {
    pub chat_id: i32,
    pub query: String,
    #[allow(dead_code)] // part of the wire contract; the server keeps its own clock
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LlmResponse {
    pub chat_id: i32,
    pub response: String,
    pub response_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ChatSummary {
    pub chat_id: i32,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
    pub messages: MessageLog,
    pub preview: Option<String>,
    pub disease: Option<String>,
    pub confidence: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaginationInfo {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Serialize)]
pub struct ChatHistoryResponse {
    pub chats: Vec<ChatSummary>,
    pub pagination: Option<PaginationInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChatHistoryQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
    #[serde(default)]
    pub include_messages: bool,
    #[serde(default)]
    pub recompute_confidence: bool,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfidenceQuery {
    pub chat_id: i32,
}

#[derive(Debug, Serialize)]
pub struct UpdateConfidenceResponse {
    pub chat_id: i32,
    pub confidence: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_json_parses_to_empty_log() {
        assert!(MessageLog::parse("not json").is_empty());
        assert!(MessageLog::parse("[1, 2, 3]").is_empty());
        assert!(MessageLog::parse("null").is_empty());
        assert!(MessageLog::parse("{}").is_empty());
    }

    #[test]
    fn replay_order_follows_numeric_keys_not_insertion() {
        let raw = r#"{
            "message3": {"query": "third", "response": "r3"},
            "message1": {"query": "first", "response": "r1"},
            "message10": {"query": "tenth", "response": "r10"},
            "message2": {"query": "second", "response": "r2"}
        }"#;
        let log = MessageLog::parse(raw);
        let queries: Vec<&str> = log
            .ordered_turns()
            .iter()
            .filter_map(|turn| turn.query.as_deref())
            .collect();
        assert_eq!(queries, vec!["first", "second", "third", "tenth"]);
    }

    #[test]
    fn replay_skips_empty_turns() {
        let raw = r#"{
            "message1": {"query": null, "response": null},
            "message2": {"query": "hello", "response": "hi"}
        }"#;
        let log = MessageLog::parse(raw);
        let turns = log.ordered_turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].query.as_deref(), Some("hello"));
    }

    #[test]
    fn append_assigns_sequential_keys() {
        let mut log = MessageLog::new();
        log.append("q1", "r1");
        log.append("q2", "r2");

        let serialized = log.to_json().unwrap();
        let reparsed = MessageLog::parse(&serialized);
        assert_eq!(reparsed.len(), 2);
        let queries: Vec<&str> = reparsed
            .ordered_turns()
            .iter()
            .filter_map(|turn| turn.query.as_deref())
            .collect();
        assert_eq!(queries, vec!["q1", "q2"]);
    }

    #[test]
    fn append_continues_after_a_gap() {
        let raw = r#"{"message7": {"query": "q", "response": "r"}}"#;
        let mut log = MessageLog::parse(raw);
        log.append("next", "resp");
        let serialized = log.to_json().unwrap();
        assert!(serialized.contains("message8"));
    }

    #[test]
    fn preview_truncates_long_first_query() {
        let mut log = MessageLog::new();
        log.append("a".repeat(60), "resp");
        let preview = log.preview().unwrap();
        assert_eq!(preview.chars().count(), 53);
        assert!(preview.ends_with("..."));

        let mut short = MessageLog::new();
        short.append("short question", "resp");
        assert_eq!(short.preview().unwrap(), "short question");
    }

    #[test]
    fn preview_is_none_without_a_first_query() {
        assert_eq!(MessageLog::new().preview(), None);
        let raw = r#"{"message1": {"query": null, "response": "only answer"}}"#;
        assert_eq!(MessageLog::parse(raw).preview(), None);
    }

    #[test]
    fn symptom_names_parse_defensively() {
        let row = |symptoms: Option<&str>| ChatRow {
            chat_id: 1,
            user_id: 1,
            messages: "{}".to_string(),
            disease: None,
            symptoms: symptoms.map(str::to_string),
            confidence: None,
            created_at: Utc::now(),
        };
        assert_eq!(
            row(Some(r#"["fever","cough"]"#)).symptom_names(),
            vec!["fever".to_string(), "cough".to_string()]
        );
        assert!(row(None).symptom_names().is_empty());
        assert!(row(Some("not json")).symptom_names().is_empty());
        assert!(row(Some(r#"{"a": 1}"#)).symptom_names().is_empty());
    }
}
