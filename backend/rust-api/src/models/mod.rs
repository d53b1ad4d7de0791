use serde::Serialize;

pub mod attempt;
mod bson_time;
pub mod content;
pub mod event;
pub mod passback;

pub use attempt::{
    AssessmentScoreRecord, Attempt, AttemptResult, AttemptState, NewAttempt, QuestionResponse,
    QuestionScore,
};
pub use content::{Assessment, AttemptLimit, ContentNode, ReviewPolicy};
pub use event::{AttemptEvent, EventAction};
pub use passback::{PassbackContext, PassbackOutcome, PassbackStatus};

#[derive(Debug, Clone, Serialize)]
pub struct EndAttemptResponse {
    pub attempt: Attempt,
    pub assessment_score: Option<f64>,
    pub passback: PassbackOutcome,
    /// Compacted attempt history for the learner, including this attempt.
    pub history: Vec<Attempt>,
}
