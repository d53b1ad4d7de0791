use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{AttemptError, EngineResult};
use crate::models::{AttemptLimit, AttemptResult, ContentNode, QuestionResponse, QuestionScore};
use crate::services::rubric::{Rubric, RubricOutcome};

/// Sentinel a grader reports for ungraded (survey style) questions. Any
/// non-finite score is treated the same way.
pub const NO_SCORE: f64 = f64::NAN;

/// Scoring work scheduled by a [`GradingCallback`]; the engine awaits all of
/// it before reading any score.
pub type PendingScore = BoxFuture<'static, EngineResult<()>>;

/// Collects per-question scores handed in by grading work.
#[derive(Clone, Default)]
pub struct ScoreAccumulator {
    scores: Arc<Mutex<HashMap<String, Option<f64>>>>,
}

impl ScoreAccumulator {
    pub fn add_score(&self, question_id: impl Into<String>, score: f64) {
        let value = score.is_finite().then_some(score);
        self.scores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(question_id.into(), value);
    }

    /// Scores in question order; questions nobody scored get 0.
    fn collect(&self, questions: &[ContentNode]) -> Vec<QuestionScore> {
        let scores = self.scores.lock().unwrap_or_else(PoisonError::into_inner);
        questions
            .iter()
            .map(|question| QuestionScore {
                id: question.id.clone(),
                score: scores.get(&question.id).copied().unwrap_or(Some(0.0)),
            })
            .collect()
    }
}

/// Per-attempt grading hook.
pub trait GradingCallback: Send + Sync {
    fn grade(
        &self,
        questions: &[ContentNode],
        responses: &[QuestionResponse],
        scores: &ScoreAccumulator,
    ) -> Vec<PendingScore>;
}

/// Grading logic for one question type.
#[async_trait]
pub trait QuestionGrader: Send + Sync {
    /// Returns the question score, or [`NO_SCORE`] for ungraded questions.
    async fn grade(
        &self,
        question: &ContentNode,
        responses: &[QuestionResponse],
    ) -> anyhow::Result<f64>;
}

/// Explicit table of question-type tag to grader.
#[derive(Clone, Default)]
pub struct GraderRegistry {
    graders: HashMap<String, Arc<dyn QuestionGrader>>,
}

impl GraderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        question_type: impl Into<String>,
        grader: Arc<dyn QuestionGrader>,
    ) -> Self {
        self.graders.insert(question_type.into(), grader);
        self
    }

    pub fn get(&self, question_type: &str) -> Option<&Arc<dyn QuestionGrader>> {
        self.graders.get(question_type)
    }
}

impl GradingCallback for GraderRegistry {
    fn grade(
        &self,
        questions: &[ContentNode],
        responses: &[QuestionResponse],
        scores: &ScoreAccumulator,
    ) -> Vec<PendingScore> {
        questions
            .iter()
            .filter_map(|question| {
                let Some(grader) = question.question_type().and_then(|tag| self.get(tag)) else {
                    tracing::debug!(
                        question_id = %question.id,
                        "No grader registered for question"
                    );
                    return None;
                };
                let grader = Arc::clone(grader);
                let question = question.clone();
                let question_responses: Vec<QuestionResponse> = responses
                    .iter()
                    .filter(|r| r.question_id == question.id)
                    .cloned()
                    .collect();
                let scores = scores.clone();

                let pending: PendingScore = Box::pin(async move {
                    let score = grader
                        .grade(&question, &question_responses)
                        .await
                        .map_err(|e| AttemptError::Grading {
                            question_id: question.id.clone(),
                            message: format!("{:#}", e),
                        })?;
                    scores.add_score(question.id, score);
                    Ok::<(), AttemptError>(())
                });
                Some(pending)
            })
            .collect()
    }
}

/// Arithmetic mean of the gradable scores. An attempt with nothing gradable
/// scores 0.
pub fn mean_gradable(scores: &[QuestionScore]) -> f64 {
    let gradable: Vec<f64> = scores.iter().filter_map(|s| s.score).collect();
    if gradable.is_empty() {
        return 0.0;
    }
    gradable.iter().sum::<f64>() / gradable.len() as f64
}

#[derive(Clone)]
pub struct ScoringEngine {
    rubric: Arc<dyn Rubric>,
}

impl ScoringEngine {
    pub fn new(rubric: Arc<dyn Rubric>) -> Self {
        Self { rubric }
    }

    pub fn rubric_name(&self) -> &'static str {
        self.rubric.name()
    }

    pub async fn score(
        &self,
        questions: &[ContentNode],
        responses: &[QuestionResponse],
        callback: &dyn GradingCallback,
    ) -> EngineResult<AttemptResult> {
        let accumulator = ScoreAccumulator::default();
        let pending = callback.grade(questions, responses, &accumulator);
        tracing::debug!(
            questions = questions.len(),
            pending = pending.len(),
            "Awaiting grading work"
        );
        try_join_all(pending).await?;

        let question_scores = accumulator.collect(questions);
        Ok(AttemptResult {
            attempt_score: mean_gradable(&question_scores),
            question_scores,
        })
    }

    pub fn assessment_score(
        &self,
        attempt_limit: AttemptLimit,
        historical_scores: &[f64],
        this_attempt_score: f64,
    ) -> RubricOutcome {
        let mut scores = historical_scores.to_vec();
        scores.push(this_attempt_score);
        self.rubric.evaluate(attempt_limit, &scores)
    }
}
