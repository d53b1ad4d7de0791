use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    AttemptEnded,
    AttemptScored,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::AttemptEnded => "attempt_ended",
            EventAction::AttemptScored => "attempt_scored",
        }
    }
}

/// Structured analytics record emitted by the end-attempt pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptEvent {
    pub action: EventAction,
    pub user_id: String,
    pub draft_id: String,
    pub content_id: String,
    pub is_preview: bool,
    pub payload: Value,
    #[serde(with = "super::bson_time")]
    pub created_at: DateTime<Utc>,
}
