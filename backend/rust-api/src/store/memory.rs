//! In-memory collaborators, used by tests and local runs without MongoDB.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AssessmentCatalog, AttemptStore, CompletionWrite};
use crate::models::{
    Assessment, AssessmentScoreRecord, Attempt, AttemptResult, AttemptState, NewAttempt,
    QuestionResponse,
};

#[derive(Default)]
struct Tables {
    attempts: HashMap<String, Attempt>,
    score_records: Vec<AssessmentScoreRecord>,
    responses: Vec<QuestionResponse>,
}

#[derive(Clone, Default)]
pub struct InMemoryAttemptStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an attempt row as-is, e.g. history restored from elsewhere.
    pub async fn insert_attempt(&self, attempt: Attempt) {
        self.tables
            .write()
            .await
            .attempts
            .insert(attempt.id.clone(), attempt);
    }

    pub async fn record_response(&self, response: QuestionResponse) {
        self.tables.write().await.responses.push(response);
    }

    pub async fn score_record_count(&self) -> usize {
        self.tables.read().await.score_records.len()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn get_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>> {
        Ok(self.tables.read().await.attempts.get(attempt_id).cloned())
    }

    async fn get_attempts_for_user_assessment(
        &self,
        user_id: &str,
        assessment_id: &str,
    ) -> Result<Vec<Attempt>> {
        let tables = self.tables.read().await;
        let mut attempts: Vec<Attempt> = tables
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.assessment_id == assessment_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn create_attempt(&self, attempt: NewAttempt) -> Result<Attempt> {
        let mut tables = self.tables.write().await;
        let previous = tables
            .attempts
            .values()
            .filter(|a| a.user_id == attempt.user_id && a.assessment_id == attempt.assessment_id)
            .filter(|a| a.is_on_track(&attempt.draft_id, attempt.is_preview))
            .count();

        let created = Attempt {
            id: Uuid::new_v4().to_string(),
            assessment_id: attempt.assessment_id,
            user_id: attempt.user_id,
            draft_id: attempt.draft_id,
            content_id: attempt.content_id,
            attempt_number: previous as u32 + 1,
            start_time: Utc::now(),
            finish_time: None,
            state: attempt.state,
            result: None,
            assessment_score_id: None,
            is_preview: attempt.is_preview,
        };
        tables.attempts.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn complete_attempt(
        &self,
        attempt_id: &str,
        finish_time: DateTime<Utc>,
        result: AttemptResult,
        score_record: AssessmentScoreRecord,
    ) -> Result<CompletionWrite> {
        let mut tables = self.tables.write().await;
        let Some(attempt) = tables.attempts.get_mut(attempt_id) else {
            return Ok(CompletionWrite::NotFound);
        };
        if attempt.is_finished() {
            return Ok(CompletionWrite::AlreadyCompleted);
        }

        attempt.finish_time = Some(finish_time);
        attempt.result = Some(result);
        attempt.assessment_score_id = Some(score_record.id.clone());
        let completed = attempt.clone();
        tables.score_records.push(score_record);

        Ok(CompletionWrite::Completed(completed))
    }

    async fn update_attempt_state(&self, attempt_id: &str, state: AttemptState) -> Result<()> {
        let mut tables = self.tables.write().await;
        let attempt = tables
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| anyhow::anyhow!("Attempt {} not found", attempt_id))?;
        attempt.state = state;
        Ok(())
    }

    async fn get_responses(&self, attempt_id: &str) -> Result<Vec<QuestionResponse>> {
        Ok(self
            .tables
            .read()
            .await
            .responses
            .iter()
            .filter(|r| r.attempt_id == attempt_id)
            .cloned()
            .collect())
    }

    async fn get_score_records(
        &self,
        user_id: &str,
        assessment_id: &str,
    ) -> Result<Vec<AssessmentScoreRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .score_records
            .iter()
            .filter(|r| r.user_id == user_id && r.assessment_id == assessment_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    assessments: Arc<RwLock<HashMap<(String, String), Assessment>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a definition; replacing models a live draft edit.
    pub async fn upsert(&self, assessment: Assessment) {
        self.assessments.write().await.insert(
            (assessment.draft_id.clone(), assessment.id.clone()),
            assessment,
        );
    }
}

#[async_trait]
impl AssessmentCatalog for InMemoryCatalog {
    async fn get_assessment(
        &self,
        draft_id: &str,
        assessment_id: &str,
    ) -> Result<Option<Assessment>> {
        Ok(self
            .assessments
            .read()
            .await
            .get(&(draft_id.to_string(), assessment_id.to_string()))
            .cloned())
    }
}
