use serde::Serialize;
use serde_json::{json, Value};

use crate::models::AttemptLimit;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RubricOutcome {
    /// `None` when no attempt counts towards the assessment score.
    pub assessment_score: Option<f64>,
    pub detail: Value,
}

/// Policy turning an ordered attempt-score history into an assessment score.
pub trait Rubric: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, attempt_limit: AttemptLimit, attempt_scores: &[f64]) -> RubricOutcome;
}

/// Scores beyond the attempt limit never count.
fn counted_scores(attempt_limit: AttemptLimit, attempt_scores: &[f64]) -> &[f64] {
    match attempt_limit.as_count() {
        Some(limit) => &attempt_scores[..attempt_scores.len().min(limit as usize)],
        None => attempt_scores,
    }
}

fn detail(
    rubric: &str,
    attempt_limit: AttemptLimit,
    counted: &[f64],
    chosen: Option<usize>,
) -> Value {
    json!({
        "rubric": rubric,
        "attempt_limit": attempt_limit,
        "counted_scores": counted,
        "chosen_attempt_index": chosen,
    })
}

/// Assessment score is the best attempt score.
#[derive(Debug, Default, Clone, Copy)]
pub struct HighestAttemptRubric;

impl Rubric for HighestAttemptRubric {
    fn name(&self) -> &'static str {
        "highest"
    }

    fn evaluate(&self, attempt_limit: AttemptLimit, attempt_scores: &[f64]) -> RubricOutcome {
        let counted = counted_scores(attempt_limit, attempt_scores);
        // Ties resolve to the earliest attempt.
        let chosen = counted
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (index, &score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((index, score)),
            });

        RubricOutcome {
            assessment_score: chosen.map(|(_, score)| score),
            detail: detail(self.name(), attempt_limit, counted, chosen.map(|(i, _)| i)),
        }
    }
}

/// Assessment score is the most recent counted attempt score.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatestAttemptRubric;

impl Rubric for LatestAttemptRubric {
    fn name(&self) -> &'static str {
        "latest"
    }

    fn evaluate(&self, attempt_limit: AttemptLimit, attempt_scores: &[f64]) -> RubricOutcome {
        let counted = counted_scores(attempt_limit, attempt_scores);
        let chosen = counted.len().checked_sub(1);

        RubricOutcome {
            assessment_score: chosen.map(|i| counted[i]),
            detail: detail(self.name(), attempt_limit, counted, chosen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_picks_best_counted_score() {
        let outcome = HighestAttemptRubric.evaluate(AttemptLimit::Unlimited, &[40.0, 90.0, 70.0]);
        assert_eq!(outcome.assessment_score, Some(90.0));
        assert_eq!(outcome.detail["chosen_attempt_index"], 1);
    }

    #[test]
    fn highest_ignores_scores_past_the_limit() {
        let outcome = HighestAttemptRubric.evaluate(AttemptLimit::Limited(2), &[40.0, 60.0, 100.0]);
        assert_eq!(outcome.assessment_score, Some(60.0));
        assert_eq!(outcome.detail["counted_scores"], json!([40.0, 60.0]));
    }

    #[test]
    fn highest_with_no_attempts_has_no_score() {
        let outcome = HighestAttemptRubric.evaluate(AttemptLimit::Limited(3), &[]);
        assert_eq!(outcome.assessment_score, None);
    }

    #[test]
    fn latest_picks_last_score() {
        let outcome = LatestAttemptRubric.evaluate(AttemptLimit::Unlimited, &[90.0, 20.0]);
        assert_eq!(outcome.assessment_score, Some(20.0));
        assert_eq!(outcome.detail["rubric"], "latest");
    }
}
