use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassbackStatus {
    Sent,
    NotSent,
    Error,
}

impl PassbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassbackStatus::Sent => "sent",
            PassbackStatus::NotSent => "not_sent",
            PassbackStatus::Error => "error",
        }
    }
}

/// Result of forwarding a score to the external grade book. Ordinary
/// non-delivery is reported here, never as an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassbackOutcome {
    pub delivered: bool,
    pub status: PassbackStatus,
    pub detail: Option<String>,
}

impl PassbackOutcome {
    pub fn sent() -> Self {
        Self {
            delivered: true,
            status: PassbackStatus::Sent,
            detail: None,
        }
    }

    pub fn not_sent(detail: impl Into<String>) -> Self {
        Self {
            delivered: false,
            status: PassbackStatus::NotSent,
            detail: Some(detail.into()),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            delivered: false,
            status: PassbackStatus::Error,
            detail: Some(detail.into()),
        }
    }
}

/// Identifies the learner/assessment pair a score is delivered for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassbackContext {
    pub user_id: String,
    pub draft_id: String,
    pub assessment_id: String,
    pub is_preview: bool,
}
