//! MongoDB-backed collaborators.
//!
//! Collections: `attempts`, `assessment_scores`, `responses`, `assessments`.
//! Completion runs in a multi-document transaction, so the deployment must be
//! a replica set (a single-node replica set is enough).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, to_bson, Bson};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use uuid::Uuid;

use super::{AssessmentCatalog, AttemptStore, CompletionWrite};
use crate::metrics::track_db_operation;
use crate::models::{
    Assessment, AssessmentScoreRecord, Attempt, AttemptResult, AttemptState, NewAttempt,
    QuestionResponse,
};

const ATTEMPTS: &str = "attempts";
const SCORES: &str = "assessment_scores";
const RESPONSES: &str = "responses";
const ASSESSMENTS: &str = "assessments";

#[derive(Clone)]
pub struct MongoAttemptStore {
    client: Client,
    mongo: Database,
}

impl MongoAttemptStore {
    pub fn new(client: Client, mongo: Database) -> Self {
        Self { client, mongo }
    }

    fn attempts(&self) -> Collection<Attempt> {
        self.mongo.collection(ATTEMPTS)
    }

    fn scores(&self) -> Collection<AssessmentScoreRecord> {
        self.mongo.collection(SCORES)
    }

    fn responses(&self) -> Collection<QuestionResponse> {
        self.mongo.collection(RESPONSES)
    }

    /// A unique attempt number per learner, assessment, draft and preview
    /// mode keeps numbers from being reused when two attempts start at once.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique_number = IndexModel::builder()
            .keys(doc! {
                "user_id": 1,
                "assessment_id": 1,
                "draft_id": 1,
                "is_preview": 1,
                "attempt_number": 1,
            })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.attempts()
            .create_index(unique_number)
            .await
            .context("Failed to create attempts index")?;

        let ledger = IndexModel::builder()
            .keys(doc! { "user_id": 1, "assessment_id": 1, "created_at": 1 })
            .build();
        self.scores()
            .create_index(ledger)
            .await
            .context("Failed to create assessment_scores index")?;

        tracing::info!("MongoDB indexes ensured for attempt store");
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for MongoAttemptStore {
    async fn get_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>> {
        track_db_operation("find_one", ATTEMPTS, async {
            self.attempts()
                .find_one(doc! { "_id": attempt_id })
                .await
                .context("Failed to query attempt")
        })
        .await
    }

    async fn get_attempts_for_user_assessment(
        &self,
        user_id: &str,
        assessment_id: &str,
    ) -> Result<Vec<Attempt>> {
        track_db_operation("find", ATTEMPTS, async {
            let cursor = self
                .attempts()
                .find(doc! { "user_id": user_id, "assessment_id": assessment_id })
                .sort(doc! { "attempt_number": 1 })
                .await
                .context("Failed to query attempts")?;
            cursor
                .try_collect()
                .await
                .context("Failed to read attempts cursor")
        })
        .await
    }

    async fn create_attempt(&self, attempt: NewAttempt) -> Result<Attempt> {
        track_db_operation("insert_one", ATTEMPTS, async {
            let previous = self
                .attempts()
                .count_documents(doc! {
                    "user_id": &attempt.user_id,
                    "assessment_id": &attempt.assessment_id,
                    "draft_id": &attempt.draft_id,
                    "is_preview": attempt.is_preview,
                })
                .await
                .context("Failed to count attempts")?;

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

            self.attempts()
                .insert_one(&created)
                .await
                .context("Failed to insert attempt")?;
            Ok::<_, anyhow::Error>(created)
        })
        .await
    }

    async fn complete_attempt(
        &self,
        attempt_id: &str,
        finish_time: DateTime<Utc>,
        result: AttemptResult,
        score_record: AssessmentScoreRecord,
    ) -> Result<CompletionWrite> {
        track_db_operation("complete", ATTEMPTS, async {
            let mut session = self
                .client
                .start_session()
                .await
                .context("Failed to start MongoDB session")?;
            session
                .start_transaction()
                .await
                .context("Failed to start transaction")?;

            let update = doc! {
                "$set": {
                    "finish_time": bson::DateTime::from_millis(finish_time.timestamp_millis()),
                    "result": to_bson(&result)?,
                    "assessment_score_id": &score_record.id,
                }
            };
            let unfinished = doc! { "_id": attempt_id, "finish_time": Bson::Null };
            let outcome = self
                .attempts()
                .update_one(unfinished, update)
                .session(&mut session)
                .await
                .context("Failed to update attempt")?;

            if outcome.matched_count == 0 {
                session
                    .abort_transaction()
                    .await
                    .context("Failed to abort transaction")?;
                return match self.get_attempt(attempt_id).await? {
                    Some(_) => Ok(CompletionWrite::AlreadyCompleted),
                    None => Ok(CompletionWrite::NotFound),
                };
            }

            self.scores()
                .insert_one(&score_record)
                .session(&mut session)
                .await
                .context("Failed to insert assessment score")?;

            session
                .commit_transaction()
                .await
                .context("Failed to commit completion")?;

            let completed = self
                .get_attempt(attempt_id)
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!("Attempt {} vanished after completion", attempt_id)
                })?;
            Ok::<_, anyhow::Error>(CompletionWrite::Completed(completed))
        })
        .await
    }

    async fn update_attempt_state(&self, attempt_id: &str, state: AttemptState) -> Result<()> {
        track_db_operation("update_one", ATTEMPTS, async {
            let outcome = self
                .attempts()
                .update_one(
                    doc! { "_id": attempt_id },
                    doc! { "$set": { "state": to_bson(&state)? } },
                )
                .await
                .context("Failed to update attempt state")?;
            if outcome.matched_count == 0 {
                anyhow::bail!("Attempt {} not found", attempt_id);
            }
            Ok::<_, anyhow::Error>(())
        })
        .await
    }

    async fn get_responses(&self, attempt_id: &str) -> Result<Vec<QuestionResponse>> {
        track_db_operation("find", RESPONSES, async {
            let cursor = self
                .responses()
                .find(doc! { "attempt_id": attempt_id })
                .sort(doc! { "_id": 1 })
                .await
                .context("Failed to query responses")?;
            cursor
                .try_collect()
                .await
                .context("Failed to read responses cursor")
        })
        .await
    }

    async fn get_score_records(
        &self,
        user_id: &str,
        assessment_id: &str,
    ) -> Result<Vec<AssessmentScoreRecord>> {
        track_db_operation("find", SCORES, async {
            let cursor = self
                .scores()
                .find(doc! { "user_id": user_id, "assessment_id": assessment_id })
                .sort(doc! { "created_at": 1 })
                .await
                .context("Failed to query assessment scores")?;
            cursor
                .try_collect()
                .await
                .context("Failed to read assessment scores cursor")
        })
        .await
    }
}

#[derive(Clone)]
pub struct MongoCatalog {
    mongo: Database,
}

impl MongoCatalog {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }
}

#[async_trait]
impl AssessmentCatalog for MongoCatalog {
    async fn get_assessment(
        &self,
        draft_id: &str,
        assessment_id: &str,
    ) -> Result<Option<Assessment>> {
        track_db_operation("find_one", ASSESSMENTS, async {
            self.mongo
                .collection::<Assessment>(ASSESSMENTS)
                .find_one(doc! { "draft_id": draft_id, "id": assessment_id })
                .await
                .context("Failed to query assessment definition")
        })
        .await
    }
}
