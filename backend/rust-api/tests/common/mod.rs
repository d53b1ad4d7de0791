#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use assessment_engine::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::{
        Assessment, Attempt, AttemptEvent, AttemptLimit, AttemptResult, AttemptState,
        ContentNode, EndAttemptResponse, NewAttempt, PassbackContext, PassbackOutcome,
        QuestionResponse, QuestionScore,
    },
    services::{
        events::EventRecorder,
        graders::builtin_registry,
        lifecycle::{AttemptLifecycleManager, LifecycleDeps},
        locks::AttemptLocks,
        passback::GradePassback,
        rubric::HighestAttemptRubric,
        scoring::{GraderRegistry, QuestionGrader, NO_SCORE},
        AppState,
    },
    store::{AttemptStore, InMemoryAttemptStore, InMemoryCatalog},
    EngineResult,
};

pub const JWT_SECRET: &str = "test-secret";
pub const DRAFT_ID: &str = "draft-1";
pub const ASSESSMENT_ID: &str = "assessment-1";
pub const USER_ID: &str = "learner-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Scores a question with the `points` value of the learner's response;
/// a response of `{"ungraded": true}` reports no score.
pub struct PointsGrader;

#[async_trait]
impl QuestionGrader for PointsGrader {
    async fn grade(&self, question: &ContentNode, responses: &[QuestionResponse]) -> Result<f64> {
        let Some(response) = responses.last() else {
            return Ok(0.0);
        };
        if response.response["ungraded"] == json!(true) {
            return Ok(NO_SCORE);
        }
        response.response["points"]
            .as_f64()
            .ok_or_else(|| anyhow!("no points recorded for {}", question.id))
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub fail: bool,
    pub events: Mutex<Vec<AttemptEvent>>,
}

impl RecordingEvents {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.action.as_str())
            .collect()
    }

    pub fn payloads(&self, action: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.action.as_str() == action)
            .map(|e| e.payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventRecorder for RecordingEvents {
    async fn record(&self, event: AttemptEvent) -> Result<()> {
        if self.fail {
            return Err(anyhow!("event store unavailable"));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Grade book double that remembers the best score it was sent.
#[derive(Default)]
pub struct RecordingPassback {
    pub fail: bool,
    pub sent: Mutex<Vec<f64>>,
}

impl RecordingPassback {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<f64> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl GradePassback for RecordingPassback {
    async fn send_score(
        &self,
        ctx: &PassbackContext,
        score: Option<f64>,
    ) -> Result<PassbackOutcome> {
        if self.fail {
            return Err(anyhow!("grade book connection refused"));
        }
        if ctx.is_preview {
            return Ok(PassbackOutcome::not_sent("preview attempt"));
        }
        let Some(score) = score else {
            return Ok(PassbackOutcome::not_sent("no assessment score to send"));
        };
        self.sent.lock().unwrap().push(score);
        Ok(PassbackOutcome::sent())
    }

    async fn latest_recorded_score(&self, _ctx: &PassbackContext) -> Result<Option<f64>> {
        if self.fail {
            return Err(anyhow!("grade book connection refused"));
        }
        Ok(self.sent.lock().unwrap().iter().copied().reduce(f64::max))
    }
}

pub struct TestEngine {
    pub store: InMemoryAttemptStore,
    pub catalog: InMemoryCatalog,
    pub events: Arc<RecordingEvents>,
    pub passback: Arc<RecordingPassback>,
    pub manager: Arc<AttemptLifecycleManager>,
}

pub fn registry() -> GraderRegistry {
    builtin_registry().register("points", Arc::new(PointsGrader))
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_collaborators(RecordingEvents::default(), RecordingPassback::default())
    }

    pub fn with_collaborators(events: RecordingEvents, passback: RecordingPassback) -> Self {
        init_tracing();

        let store = InMemoryAttemptStore::new();
        let catalog = InMemoryCatalog::new();
        let events = Arc::new(events);
        let passback = Arc::new(passback);

        let manager = AttemptLifecycleManager::new(LifecycleDeps {
            store: Arc::new(store.clone()),
            catalog: Arc::new(catalog.clone()),
            grading: Arc::new(registry()),
            rubric: Arc::new(HighestAttemptRubric),
            passback: passback.clone(),
            events: events.clone(),
            locks: AttemptLocks::local(),
        });

        Self {
            store,
            catalog,
            events,
            passback,
            manager: Arc::new(manager),
        }
    }

    pub async fn with_assessment(self, assessment: Assessment) -> Self {
        self.catalog.upsert(assessment).await;
        self
    }

    /// Starts an attempt over `questions` and records one response per
    /// question from `answers`.
    pub async fn start_attempt(&self, questions: &[ContentNode], answers: &[Value]) -> Attempt {
        self.start_attempt_for(USER_ID, questions, answers, false)
            .await
    }

    pub async fn start_attempt_for(
        &self,
        user_id: &str,
        questions: &[ContentNode],
        answers: &[Value],
        is_preview: bool,
    ) -> Attempt {
        let attempt = self
            .store
            .create_attempt(NewAttempt {
                user_id: user_id.to_string(),
                draft_id: DRAFT_ID.to_string(),
                assessment_id: ASSESSMENT_ID.to_string(),
                content_id: "content-1".to_string(),
                state: state_for(questions),
                is_preview,
            })
            .await
            .unwrap();

        for (question, answer) in questions.iter().zip(answers) {
            self.store
                .record_response(QuestionResponse {
                    attempt_id: attempt.id.clone(),
                    question_id: question.id.clone(),
                    response: answer.clone(),
                })
                .await;
        }
        attempt
    }

    /// Ends `attempt` as the learner who started it.
    pub async fn end(&self, attempt: &Attempt) -> EngineResult<EndAttemptResponse> {
        self.manager
            .end_attempt(&attempt.id, &attempt.user_id)
            .await
    }

    pub async fn stored(&self, attempt: &Attempt) -> Attempt {
        self.store.get_attempt(&attempt.id).await.unwrap().unwrap()
    }

    pub fn router(&self) -> Router {
        let state = AppState::with_engine(Config::local(JWT_SECRET), Arc::clone(&self.manager));
        create_router(Arc::new(state))
    }
}

pub fn points_question(id: &str, text: &str) -> ContentNode {
    ContentNode::question(id, json!({ "question_type": "points", "text": text }))
}

pub fn points(value: f64) -> Value {
    json!({ "points": value })
}

pub fn bank(questions: Vec<ContentNode>) -> ContentNode {
    ContentNode::question_bank("bank", json!({ "choose": questions.len() }), questions)
}

pub fn state_for(questions: &[ContentNode]) -> AttemptState {
    AttemptState {
        chosen: vec![bank(questions.to_vec())],
        questions: questions.to_vec(),
    }
}

pub fn assessment(limit: AttemptLimit, review: &str, questions: Vec<ContentNode>) -> Assessment {
    Assessment {
        id: ASSESSMENT_ID.to_string(),
        draft_id: DRAFT_ID.to_string(),
        attempt_limit: limit,
        review: review.to_string(),
        question_bank: bank(questions),
    }
}

/// A finished attempt row with the given timing and score.
pub fn finished_attempt(
    id: &str,
    number: u32,
    start: DateTime<Utc>,
    finish: DateTime<Utc>,
    score: f64,
) -> Attempt {
    Attempt {
        id: id.to_string(),
        assessment_id: ASSESSMENT_ID.to_string(),
        user_id: USER_ID.to_string(),
        draft_id: DRAFT_ID.to_string(),
        content_id: "content-1".to_string(),
        attempt_number: number,
        start_time: start,
        finish_time: Some(finish),
        state: AttemptState::default(),
        result: Some(AttemptResult {
            attempt_score: score,
            question_scores: vec![QuestionScore {
                id: "q1".to_string(),
                score: Some(score),
            }],
        }),
        assessment_score_id: Some(format!("score-{}", id)),
        is_preview: false,
    }
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
}

pub fn bearer(user_id: &str) -> String {
    let token = JwtService::new(JWT_SECRET)
        .generate_token(&JwtClaims::for_user(user_id, 3600))
        .unwrap();
    format!("Bearer {}", token)
}
