use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{PassbackContext, PassbackOutcome};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Delivery of assessment scores to the external grade book.
#[async_trait]
pub trait GradePassback: Send + Sync {
    /// Ordinary non-delivery is reported through the outcome; `Err` is kept
    /// for faults of the collaborator itself.
    async fn send_score(
        &self,
        ctx: &PassbackContext,
        score: Option<f64>,
    ) -> Result<PassbackOutcome>;

    /// Highest score the grade book currently holds for the learner.
    async fn latest_recorded_score(&self, ctx: &PassbackContext) -> Result<Option<f64>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGradePassback;

#[async_trait]
impl GradePassback for DisabledGradePassback {
    async fn send_score(
        &self,
        _ctx: &PassbackContext,
        _score: Option<f64>,
    ) -> Result<PassbackOutcome> {
        Ok(PassbackOutcome::not_sent("grade passback not configured"))
    }

    async fn latest_recorded_score(&self, _ctx: &PassbackContext) -> Result<Option<f64>> {
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
struct ScorePayload<'a> {
    user_id: &'a str,
    draft_id: &'a str,
    assessment_id: &'a str,
    score: f64,
    is_preview: bool,
}

#[derive(Debug, Deserialize)]
struct LatestScoreResponse {
    score: Option<f64>,
}

pub struct HttpGradePassback {
    http_client: Client,
    base_url: String,
}

impl HttpGradePassback {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GradePassback for HttpGradePassback {
    async fn send_score(
        &self,
        ctx: &PassbackContext,
        score: Option<f64>,
    ) -> Result<PassbackOutcome> {
        if ctx.is_preview {
            return Ok(PassbackOutcome::not_sent("preview attempt"));
        }
        let Some(score) = score else {
            return Ok(PassbackOutcome::not_sent("no assessment score to send"));
        };

        let url = format!("{}/scores", self.base_url);
        let payload = ScorePayload {
            user_id: &ctx.user_id,
            draft_id: &ctx.draft_id,
            assessment_id: &ctx.assessment_id,
            score,
            is_preview: ctx.is_preview,
        };

        tracing::debug!("Sending score {} to grade book at {}", score, url);

        // Only transport failures are retried; an HTTP error status is an answer.
        let sent = retry_async_with_config(RetryConfig::default(), || async {
            self.http_client
                .post(&url)
                .json(&payload)
                .timeout(Duration::from_secs(5))
                .send()
                .await
        })
        .await;

        let outcome = match sent {
            Ok(response) if response.status().is_success() => PassbackOutcome::sent(),
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                PassbackOutcome::not_sent(format!("grade book responded {}: {}", status, body))
            }
            Err(e) => PassbackOutcome::error(format!("grade book unreachable: {}", e)),
        };
        Ok(outcome)
    }

    async fn latest_recorded_score(&self, ctx: &PassbackContext) -> Result<Option<f64>> {
        let url = format!("{}/scores/latest", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("user_id", ctx.user_id.as_str()),
                ("draft_id", ctx.draft_id.as_str()),
                ("assessment_id", ctx.assessment_id.as_str()),
            ])
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Failed to call grade book")?
            .error_for_status()
            .context("Grade book rejected latest score request")?;

        let latest: LatestScoreResponse = response
            .json()
            .await
            .context("Failed to parse grade book response")?;
        Ok(latest.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(is_preview: bool) -> PassbackContext {
        PassbackContext {
            user_id: "u1".to_string(),
            draft_id: "d1".to_string(),
            assessment_id: "a1".to_string(),
            is_preview,
        }
    }

    #[tokio::test]
    async fn preview_attempts_are_not_sent() {
        let passback = HttpGradePassback::new("http://127.0.0.1:9");
        let outcome = passback.send_score(&ctx(true), Some(90.0)).await.unwrap();
        assert!(!outcome.delivered);
        assert_eq!(outcome.detail.as_deref(), Some("preview attempt"));
    }

    #[tokio::test]
    async fn missing_score_is_not_sent() {
        let passback = HttpGradePassback::new("http://127.0.0.1:9/");
        let outcome = passback.send_score(&ctx(false), None).await.unwrap();
        assert_eq!(outcome.status, crate::models::PassbackStatus::NotSent);
    }

    #[tokio::test]
    async fn disabled_passback_reports_not_sent() {
        let outcome = DisabledGradePassback
            .send_score(&ctx(false), Some(1.0))
            .await
            .unwrap();
        assert_eq!(outcome.status, crate::models::PassbackStatus::NotSent);

        let latest = DisabledGradePassback
            .latest_recorded_score(&ctx(false))
            .await
            .unwrap();
        assert_eq!(latest, None);
    }
}
