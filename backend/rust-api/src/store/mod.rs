//! Persistence collaborators: attempt rows, the assessment-score ledger,
//! learner responses and read-only assessment definitions.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Assessment, AssessmentScoreRecord, Attempt, AttemptResult, AttemptState, NewAttempt,
    QuestionResponse,
};

pub mod memory;
pub mod mongo;

pub use memory::{InMemoryAttemptStore, InMemoryCatalog};
pub use mongo::{MongoAttemptStore, MongoCatalog};

/// Outcome of the guarded completion write.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionWrite {
    Completed(Attempt),
    AlreadyCompleted,
    NotFound,
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn get_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>>;

    /// All attempts of a learner for one assessment, ordered by attempt number.
    async fn get_attempts_for_user_assessment(
        &self,
        user_id: &str,
        assessment_id: &str,
    ) -> Result<Vec<Attempt>>;

    /// Creates an in-progress attempt with the next gap-free attempt number.
    async fn create_attempt(&self, attempt: NewAttempt) -> Result<Attempt>;

    /// Sets `finish_time`, `result` and `assessment_score_id` and appends the
    /// ledger record as one atomic write, only if the attempt is unfinished.
    async fn complete_attempt(
        &self,
        attempt_id: &str,
        finish_time: DateTime<Utc>,
        result: AttemptResult,
        score_record: AssessmentScoreRecord,
    ) -> Result<CompletionWrite>;

    async fn update_attempt_state(&self, attempt_id: &str, state: AttemptState) -> Result<()>;

    async fn get_responses(&self, attempt_id: &str) -> Result<Vec<QuestionResponse>>;

    /// Ledger entries for a learner/assessment pair in creation order.
    async fn get_score_records(
        &self,
        user_id: &str,
        assessment_id: &str,
    ) -> Result<Vec<AssessmentScoreRecord>>;
}

/// The learner's attempts at the same assessment that share `attempt`'s draft
/// and preview mode, ordered by attempt number.
pub async fn attempts_on_track(
    store: &dyn AttemptStore,
    attempt: &Attempt,
) -> Result<Vec<Attempt>> {
    let attempts = store
        .get_attempts_for_user_assessment(&attempt.user_id, &attempt.assessment_id)
        .await?;
    Ok(attempts
        .into_iter()
        .filter(|a| a.is_on_track(&attempt.draft_id, attempt.is_preview))
        .collect())
}

#[async_trait]
pub trait AssessmentCatalog: Send + Sync {
    async fn get_assessment(&self, draft_id: &str, assessment_id: &str)
        -> Result<Option<Assessment>>;
}
