//! Graders for the question types the service understands out of the box.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::models::{ContentNode, QuestionResponse};
use crate::services::scoring::{GraderRegistry, QuestionGrader, NO_SCORE};

pub const FULL_SCORE: f64 = 100.0;

/// The learner's last recorded response wins.
fn latest_response(responses: &[QuestionResponse]) -> Option<&Value> {
    responses.last().map(|r| &r.response)
}

fn expected<'a>(question: &'a ContentNode, field: &str) -> Result<&'a Value> {
    question
        .content
        .get(field)
        .ok_or_else(|| anyhow!("question {} has no {}", question.id, field))
}

/// Free-text answer compared against `correct_answer`, ignoring surrounding
/// whitespace.
pub struct TextAnswerGrader;

#[async_trait]
impl QuestionGrader for TextAnswerGrader {
    async fn grade(&self, question: &ContentNode, responses: &[QuestionResponse]) -> Result<f64> {
        let correct = expected(question, "correct_answer")?
            .as_str()
            .ok_or_else(|| anyhow!("question {} correct_answer is not text", question.id))?;

        let given = latest_response(responses)
            .and_then(|r| r.get("answer"))
            .and_then(Value::as_str);

        Ok(match given {
            Some(answer) if answer.trim() == correct.trim() => FULL_SCORE,
            _ => 0.0,
        })
    }
}

/// Choice question: full score only when the selected `ids` equal
/// `correct_ids` as a set.
pub struct ChoiceGrader;

fn id_set(value: &Value) -> Option<BTreeSet<&str>> {
    value.as_array()?.iter().map(Value::as_str).collect()
}

#[async_trait]
impl QuestionGrader for ChoiceGrader {
    async fn grade(&self, question: &ContentNode, responses: &[QuestionResponse]) -> Result<f64> {
        let correct = id_set(expected(question, "correct_ids")?)
            .ok_or_else(|| anyhow!("question {} correct_ids must be a list of ids", question.id))?;

        let chosen = latest_response(responses)
            .and_then(|r| r.get("ids"))
            .and_then(id_set);

        Ok(match chosen {
            Some(chosen) if chosen == correct => FULL_SCORE,
            _ => 0.0,
        })
    }
}

/// Survey questions are never graded.
pub struct SurveyGrader;

#[async_trait]
impl QuestionGrader for SurveyGrader {
    async fn grade(&self, _question: &ContentNode, _responses: &[QuestionResponse]) -> Result<f64> {
        Ok(NO_SCORE)
    }
}

pub fn builtin_registry() -> GraderRegistry {
    GraderRegistry::new()
        .register("text", Arc::new(TextAnswerGrader))
        .register("choice", Arc::new(ChoiceGrader))
        .register("survey", Arc::new(SurveyGrader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: Value) -> QuestionResponse {
        QuestionResponse {
            attempt_id: "att-1".to_string(),
            question_id: "q1".to_string(),
            response: value,
        }
    }

    #[tokio::test]
    async fn text_answer_ignores_surrounding_whitespace() {
        let question = ContentNode::question(
            "q1",
            json!({ "question_type": "text", "correct_answer": "Paris" }),
        );

        let score = TextAnswerGrader
            .grade(&question, &[response(json!({ "answer": "  Paris " }))])
            .await
            .unwrap();
        assert_eq!(score, FULL_SCORE);

        let score = TextAnswerGrader.grade(&question, &[]).await.unwrap();
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn choice_uses_latest_response_as_a_set() {
        let question = ContentNode::question(
            "q1",
            json!({ "question_type": "choice", "correct_ids": ["a", "c"] }),
        );
        let responses = vec![
            response(json!({ "ids": ["a"] })),
            response(json!({ "ids": ["c", "a"] })),
        ];

        let both = ChoiceGrader.grade(&question, &responses).await.unwrap();
        let first_only = ChoiceGrader
            .grade(&question, &responses[..1])
            .await
            .unwrap();
        assert_eq!(both, FULL_SCORE);
        assert_eq!(first_only, 0.0);
    }

    #[tokio::test]
    async fn misconfigured_question_is_an_error() {
        let question = ContentNode::question("q1", json!({ "question_type": "choice" }));
        assert!(ChoiceGrader.grade(&question, &[]).await.is_err());
    }

    #[tokio::test]
    async fn survey_is_ungraded() {
        let question = ContentNode::question("q1", json!({ "question_type": "survey" }));
        assert!(SurveyGrader.grade(&question, &[]).await.unwrap().is_nan());
        assert!(builtin_registry().get("survey").is_some());
    }
}
