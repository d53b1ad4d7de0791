use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bson_time;
use super::content::ContentNode;

/// One learner's pass through an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub assessment_id: String,
    pub user_id: String,
    pub draft_id: String,
    pub content_id: String,
    pub attempt_number: u32,
    #[serde(with = "bson_time")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "bson_time::option")]
    pub finish_time: Option<DateTime<Utc>>,
    pub state: AttemptState,
    #[serde(default)]
    pub result: Option<AttemptResult>,
    #[serde(default)]
    pub assessment_score_id: Option<String>,
    #[serde(default)]
    pub is_preview: bool,
}

impl Attempt {
    pub fn is_finished(&self) -> bool {
        self.finish_time.is_some()
    }

    /// Numbering, scoring history and review only count attempts of the same
    /// draft and the same preview mode.
    pub fn is_on_track(&self, draft_id: &str, is_preview: bool) -> bool {
        self.draft_id == draft_id && self.is_preview == is_preview
    }
}

/// Frozen snapshot of what was selected for an attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptState {
    /// Selection tree as chosen from the question bank at attempt start.
    pub chosen: Vec<ContentNode>,
    /// Flat, ordered list of questions shown to the learner.
    pub questions: Vec<ContentNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt_score: f64,
    pub question_scores: Vec<QuestionScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub id: String,
    /// `None` marks an ungraded question (survey style); it is excluded from
    /// the attempt score.
    pub score: Option<f64>,
}

/// Append-only ledger entry: the assessment-level score as of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentScoreRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub draft_id: String,
    pub assessment_id: String,
    pub attempt_id: String,
    pub score: Option<f64>,
    #[serde(default)]
    pub score_details: Value,
    #[serde(default)]
    pub is_preview: bool,
    #[serde(with = "bson_time")]
    pub created_at: DateTime<Utc>,
}

/// Input for the attempt-start collaborator.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub user_id: String,
    pub draft_id: String,
    pub assessment_id: String,
    pub content_id: String,
    pub state: AttemptState,
    pub is_preview: bool,
}

/// A learner's recorded response to one question of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub attempt_id: String,
    pub question_id: String,
    #[serde(default)]
    pub response: Value,
}
