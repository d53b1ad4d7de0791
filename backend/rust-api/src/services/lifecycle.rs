use chrono::Utc;
use serde_json::json;
use std::fmt::Display;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AttemptError, EngineResult};
use crate::metrics::{
    ATTEMPTS_COMPLETED_TOTAL, ATTEMPT_PIPELINE_STAGE_FAILURES_TOTAL, ATTEMPT_SCORES,
    GRADE_PASSBACK_TOTAL,
};
use crate::models::{
    Assessment, AssessmentScoreRecord, Attempt, AttemptEvent, EndAttemptResponse, EventAction,
    PassbackContext, PassbackOutcome,
};
use crate::services::events::EventRecorder;
use crate::services::history::{compact, completed_scores};
use crate::services::locks::AttemptLocks;
use crate::services::passback::GradePassback;
use crate::services::review::ReviewReconciler;
use crate::services::rubric::{Rubric, RubricOutcome};
use crate::services::scoring::{GradingCallback, ScoringEngine};
use crate::store::{attempts_on_track, AssessmentCatalog, AttemptStore, CompletionWrite};

/// Collaborators the lifecycle manager is wired with.
pub struct LifecycleDeps {
    pub store: Arc<dyn AttemptStore>,
    pub catalog: Arc<dyn AssessmentCatalog>,
    pub grading: Arc<dyn GradingCallback>,
    pub rubric: Arc<dyn Rubric>,
    pub passback: Arc<dyn GradePassback>,
    pub events: Arc<dyn EventRecorder>,
    pub locks: AttemptLocks,
}

/// State produced by the durable part of the pipeline (load, score, persist).
struct CommittedAttempt {
    attempt: Attempt,
    assessment: Assessment,
    rubric: RubricOutcome,
    /// Raw attempt rows as loaded before completion.
    loaded_attempts: Vec<Attempt>,
}

pub struct AttemptLifecycleManager {
    store: Arc<dyn AttemptStore>,
    catalog: Arc<dyn AssessmentCatalog>,
    grading: Arc<dyn GradingCallback>,
    scoring: ScoringEngine,
    reconciler: ReviewReconciler,
    passback: Arc<dyn GradePassback>,
    events: Arc<dyn EventRecorder>,
    locks: AttemptLocks,
}

fn stage_failed(stage: &'static str, attempt_id: &str, error: &dyn Display) {
    ATTEMPT_PIPELINE_STAGE_FAILURES_TOTAL
        .with_label_values(&[stage])
        .inc();
    tracing::error!(stage, attempt_id, error = %error, "Best-effort attempt stage failed");
}

impl AttemptLifecycleManager {
    pub fn new(deps: LifecycleDeps) -> Self {
        Self {
            reconciler: ReviewReconciler::new(Arc::clone(&deps.store), deps.locks.clone()),
            scoring: ScoringEngine::new(deps.rubric),
            store: deps.store,
            catalog: deps.catalog,
            grading: deps.grading,
            passback: deps.passback,
            events: deps.events,
            locks: deps.locks,
        }
    }

    /// Finishes an attempt: scores it, commits the result and score ledger
    /// entry, then runs the best-effort follow-ups and returns the learner's
    /// compacted history.
    pub async fn end_attempt(
        &self,
        attempt_id: &str,
        user_id: &str,
    ) -> EngineResult<EndAttemptResponse> {
        tracing::info!(attempt_id, user_id, "Ending attempt");

        let guard = self.locks.acquire(attempt_id).await?;
        let committed = self.complete(attempt_id, user_id).await;
        if let Err(e) = guard.release().await {
            tracing::warn!(attempt_id, error = %e, "Failed to release attempt lock");
        }

        let committed = match committed {
            Ok(committed) => committed,
            Err(e) => {
                let outcome = match e {
                    AttemptError::AlreadyCompleted(_) => "already_completed",
                    _ => "failed",
                };
                ATTEMPTS_COMPLETED_TOTAL.with_label_values(&[outcome]).inc();
                tracing::warn!(attempt_id, user_id, error = %e, "Attempt was not completed");
                return Err(e);
            }
        };
        ATTEMPTS_COMPLETED_TOTAL
            .with_label_values(&["completed"])
            .inc();

        // Independent and failure-isolated once the result is committed.
        let ((), (), passback) = tokio::join!(
            self.reconcile_for_review(&committed),
            self.record_attempt_ended(&committed),
            self.pass_back_and_record_score(&committed),
        );

        let history = self.history_after(&committed).await;

        Ok(EndAttemptResponse {
            assessment_score: committed.rubric.assessment_score,
            attempt: committed.attempt,
            passback,
            history,
        })
    }

    /// Load, score and persist. Every failure here aborts before or at the
    /// single durable write.
    async fn complete(&self, attempt_id: &str, user_id: &str) -> EngineResult<CommittedAttempt> {
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| AttemptError::AttemptNotFound(attempt_id.to_string()))?;
        if attempt.user_id != user_id {
            return Err(AttemptError::NotAttemptOwner {
                attempt_id: attempt_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        if attempt.is_finished() {
            return Err(AttemptError::AlreadyCompleted(attempt_id.to_string()));
        }

        let assessment = self
            .catalog
            .get_assessment(&attempt.draft_id, &attempt.assessment_id)
            .await?
            .ok_or_else(|| AttemptError::AssessmentNotFound(attempt.assessment_id.clone()))?;
        let loaded_attempts = attempts_on_track(self.store.as_ref(), &attempt).await?;
        let historical_scores = completed_scores(&compact(&loaded_attempts));
        let responses = self.store.get_responses(attempt_id).await?;

        let result = self
            .scoring
            .score(&attempt.state.questions, &responses, self.grading.as_ref())
            .await?;
        let rubric = self.scoring.assessment_score(
            assessment.attempt_limit,
            &historical_scores,
            result.attempt_score,
        );
        ATTEMPT_SCORES.observe(result.attempt_score);
        tracing::info!(
            attempt_id,
            attempt_score = result.attempt_score,
            assessment_score = ?rubric.assessment_score,
            rubric = self.scoring.rubric_name(),
            "Attempt scored"
        );

        let finish_time = Utc::now();
        let score_record = AssessmentScoreRecord {
            id: Uuid::new_v4().to_string(),
            user_id: attempt.user_id.clone(),
            draft_id: attempt.draft_id.clone(),
            assessment_id: attempt.assessment_id.clone(),
            attempt_id: attempt.id.clone(),
            score: rubric.assessment_score,
            score_details: rubric.detail.clone(),
            is_preview: attempt.is_preview,
            created_at: finish_time,
        };

        let completed = match self
            .store
            .complete_attempt(attempt_id, finish_time, result, score_record)
            .await?
        {
            CompletionWrite::Completed(completed) => completed,
            CompletionWrite::AlreadyCompleted => {
                return Err(AttemptError::AlreadyCompleted(attempt_id.to_string()))
            }
            CompletionWrite::NotFound => {
                return Err(AttemptError::AttemptNotFound(attempt_id.to_string()))
            }
        };
        tracing::info!(
            attempt_id,
            attempt_number = completed.attempt_number,
            "Attempt committed"
        );

        Ok(CommittedAttempt {
            attempt: completed,
            assessment,
            rubric,
            loaded_attempts,
        })
    }

    async fn reconcile_for_review(&self, committed: &CommittedAttempt) {
        let attempt_id = committed.attempt.id.as_str();
        match self
            .reconciler
            .reconcile(&committed.assessment, &committed.attempt)
            .await
        {
            Ok(_) => {}
            Err(AttemptError::UnknownReviewPolicy(policy)) => {
                ATTEMPT_PIPELINE_STAGE_FAILURES_TOTAL
                    .with_label_values(&["reconcile"])
                    .inc();
                tracing::error!(
                    attempt_id,
                    assessment_id = %committed.assessment.id,
                    policy = %policy,
                    "Configuration error: unknown review policy on assessment"
                );
            }
            Err(e) => stage_failed("reconcile", attempt_id, &e),
        }
    }

    async fn record_attempt_ended(&self, committed: &CommittedAttempt) {
        let attempt = &committed.attempt;
        let duration_ms = attempt
            .finish_time
            .map(|finished| (finished - attempt.start_time).num_milliseconds());
        let event = self.event(
            EventAction::AttemptEnded,
            attempt,
            json!({
                "attempt_id": attempt.id,
                "assessment_id": attempt.assessment_id,
                "attempt_number": attempt.attempt_number,
                "duration_ms": duration_ms,
            }),
        );

        if let Err(e) = self.events.record(event).await {
            stage_failed("record_attempt_ended", &attempt.id, &e);
        }
    }

    /// Grade passback followed by the scoring event, which reports the
    /// delivery status and the grade book's score as read afterwards.
    async fn pass_back_and_record_score(&self, committed: &CommittedAttempt) -> PassbackOutcome {
        let attempt = &committed.attempt;
        let ctx = PassbackContext {
            user_id: attempt.user_id.clone(),
            draft_id: attempt.draft_id.clone(),
            assessment_id: attempt.assessment_id.clone(),
            is_preview: attempt.is_preview,
        };

        let outcome = match self
            .passback
            .send_score(&ctx, committed.rubric.assessment_score)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                stage_failed("grade_passback", &attempt.id, &e);
                PassbackOutcome::error(format!("{:#}", e))
            }
        };
        GRADE_PASSBACK_TOTAL
            .with_label_values(&[outcome.status.as_str()])
            .inc();
        tracing::info!(
            attempt_id = %attempt.id,
            status = outcome.status.as_str(),
            detail = ?outcome.detail,
            "Grade passback finished"
        );

        let latest_external = match self.passback.latest_recorded_score(&ctx).await {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!(
                    attempt_id = %attempt.id,
                    error = %e,
                    "Failed to read latest external score"
                );
                None
            }
        };

        let event = self.event(
            EventAction::AttemptScored,
            attempt,
            json!({
                "attempt_id": attempt.id,
                "assessment_id": attempt.assessment_id,
                "attempt_score": attempt.result.as_ref().map(|r| r.attempt_score),
                "assessment_score": committed.rubric.assessment_score,
                "assessment_score_id": attempt.assessment_score_id,
                "score_details": committed.rubric.detail,
                "passback_status": outcome.status,
                "passback_detail": outcome.detail,
                "latest_external_score": latest_external,
            }),
        );
        if let Err(e) = self.events.record(event).await {
            stage_failed("record_attempt_scored", &attempt.id, &e);
        }

        outcome
    }

    async fn history_after(&self, committed: &CommittedAttempt) -> Vec<Attempt> {
        let attempt = &committed.attempt;
        match attempts_on_track(self.store.as_ref(), attempt).await {
            Ok(attempts) => compact(&attempts),
            Err(e) => {
                tracing::error!(
                    attempt_id = %attempt.id,
                    error = %e,
                    "Failed to reload history, using loaded rows"
                );
                let attempts: Vec<Attempt> = committed
                    .loaded_attempts
                    .iter()
                    .map(|a| if a.id == attempt.id { attempt.clone() } else { a.clone() })
                    .collect();
                compact(&attempts)
            }
        }
    }

    fn event(
        &self,
        action: EventAction,
        attempt: &Attempt,
        payload: serde_json::Value,
    ) -> AttemptEvent {
        AttemptEvent {
            action,
            user_id: attempt.user_id.clone(),
            draft_id: attempt.draft_id.clone(),
            content_id: attempt.content_id.clone(),
            is_preview: attempt.is_preview,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Compacted history of a learner for one assessment of a draft, either
    /// the real attempts or the preview ones.
    pub async fn history(
        &self,
        user_id: &str,
        draft_id: &str,
        assessment_id: &str,
        is_preview: bool,
    ) -> EngineResult<Vec<Attempt>> {
        let attempts: Vec<Attempt> = self
            .store
            .get_attempts_for_user_assessment(user_id, assessment_id)
            .await?
            .into_iter()
            .filter(|a| a.is_on_track(draft_id, is_preview))
            .collect();
        Ok(compact(&attempts))
    }

    /// Fetches one attempt on behalf of its owner.
    pub async fn attempt_for_user(&self, attempt_id: &str, user_id: &str) -> EngineResult<Attempt> {
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| AttemptError::AttemptNotFound(attempt_id.to_string()))?;
        if attempt.user_id != user_id {
            return Err(AttemptError::NotAttemptOwner {
                attempt_id: attempt_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        Ok(attempt)
    }

    /// Ledger of assessment scores for a learner, oldest first.
    pub async fn score_records(
        &self,
        user_id: &str,
        assessment_id: &str,
    ) -> EngineResult<Vec<AssessmentScoreRecord>> {
        Ok(self.store.get_score_records(user_id, assessment_id).await?)
    }
}
