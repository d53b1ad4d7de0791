use crate::models::Attempt;

/// Canonical attempt history: completed attempts in finish order, followed by
/// at most one in-progress attempt.
///
/// Only the most recently started unfinished attempt is considered, and it is
/// kept only if it started after the last completion. Older unfinished
/// attempts are abandoned sessions and are dropped.
pub fn compact(attempts: &[Attempt]) -> Vec<Attempt> {
    let (mut completed, incomplete): (Vec<&Attempt>, Vec<&Attempt>) =
        attempts.iter().partition(|a| a.is_finished());

    completed.sort_by_key(|a| a.finish_time);

    let candidate = incomplete.into_iter().max_by_key(|a| a.start_time);
    let kept = candidate.filter(|c| match completed.last() {
        Some(last) => Some(c.start_time) > last.finish_time,
        None => true,
    });

    completed.into_iter().chain(kept).cloned().collect()
}

/// Attempt scores of the completed attempts, in history order.
pub fn completed_scores(history: &[Attempt]) -> Vec<f64> {
    history
        .iter()
        .filter_map(|a| a.result.as_ref().map(|r| r.attempt_score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttemptResult, AttemptState};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn attempt(id: &str, start: i64, finish: Option<i64>) -> Attempt {
        Attempt {
            id: id.to_string(),
            assessment_id: "assessment".to_string(),
            user_id: "user".to_string(),
            draft_id: "draft".to_string(),
            content_id: "content".to_string(),
            attempt_number: 1,
            start_time: at(start),
            finish_time: finish.map(at),
            state: AttemptState::default(),
            result: finish.map(|f| AttemptResult {
                attempt_score: f as f64,
                question_scores: vec![],
            }),
            assessment_score_id: None,
            is_preview: false,
        }
    }

    fn finished_trio() -> Vec<Attempt> {
        vec![
            attempt("c", 300, Some(302)),
            attempt("a", 100, Some(102)),
            attempt("b", 200, Some(202)),
        ]
    }

    fn ids(history: &[Attempt]) -> Vec<&str> {
        history.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn stale_incomplete_is_dropped() {
        let mut attempts = finished_trio();
        attempts.push(attempt("stale", 301, None));

        let history = compact(&attempts);

        assert_eq!(history.len(), 3);
        assert_eq!(ids(&history), vec!["a", "b", "c"]);
        assert_eq!(completed_scores(&history), vec![102.0, 202.0, 302.0]);
    }

    #[test]
    fn fresh_incomplete_is_appended() {
        let mut attempts = finished_trio();
        attempts.push(attempt("stale", 301, None));
        attempts.push(attempt("fresh", 600, None));

        let history = compact(&attempts);

        assert_eq!(history.len(), 4);
        assert_eq!(ids(&history), vec!["a", "b", "c", "fresh"]);
    }

    #[test]
    fn only_latest_incomplete_is_a_candidate() {
        let attempts = vec![
            attempt("done", 100, Some(150)),
            attempt("older", 200, None),
            attempt("newer", 300, None),
        ];

        assert_eq!(ids(&compact(&attempts)), vec!["done", "newer"]);
    }

    #[test]
    fn incomplete_before_last_completion_is_dropped() {
        let attempts = vec![
            attempt("done", 100, Some(500)),
            attempt("older", 50, None),
            attempt("newer", 400, None),
        ];

        assert_eq!(ids(&compact(&attempts)), vec!["done"]);
    }

    #[test]
    fn incomplete_kept_without_completions() {
        let attempts = vec![attempt("one", 10, None), attempt("two", 20, None)];
        assert_eq!(ids(&compact(&attempts)), vec!["two"]);
    }

    #[test]
    fn equal_start_and_finish_is_not_after() {
        let attempts = vec![attempt("done", 100, Some(200)), attempt("same", 200, None)];
        assert_eq!(ids(&compact(&attempts)), vec!["done"]);
    }

    #[test]
    fn empty_history() {
        assert!(compact(&[]).is_empty());
    }

    #[test]
    fn input_is_not_mutated() {
        let attempts = finished_trio();
        let before = attempts.clone();
        let _ = compact(&attempts);
        assert_eq!(attempts, before);
    }
}
