use thiserror::Error;

/// Errors surfaced by the attempt engine to its callers.
///
/// Collaborator plumbing (Mongo, Redis, HTTP) reports `anyhow::Error`, which is
/// folded into [`AttemptError::Storage`] at the engine boundary.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("Attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("Attempt {attempt_id} does not belong to user {user_id}")]
    NotAttemptOwner { attempt_id: String, user_id: String },

    #[error("Assessment not found: {0}")]
    AssessmentNotFound(String),

    /// The attempt was finished by an earlier (or concurrent) request.
    /// Retrying callers may treat this as success-already-happened.
    #[error("Attempt already completed: {0}")]
    AlreadyCompleted(String),

    #[error("Failed to grade question {question_id}: {message}")]
    Grading {
        question_id: String,
        message: String,
    },

    #[error("Unknown review policy: {0}")]
    UnknownReviewPolicy(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, AttemptError>;

impl AttemptError {
    /// Stable machine-readable code, used in HTTP error bodies and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            AttemptError::AttemptNotFound(_) => "attempt_not_found",
            AttemptError::NotAttemptOwner { .. } => "attempt_not_owned",
            AttemptError::AssessmentNotFound(_) => "assessment_not_found",
            AttemptError::AlreadyCompleted(_) => "attempt_already_completed",
            AttemptError::Grading { .. } => "grading_failed",
            AttemptError::UnknownReviewPolicy(_) => "unknown_review_policy",
            AttemptError::Storage(_) => "storage_error",
        }
    }
}
