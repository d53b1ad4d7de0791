use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::Database;

use crate::metrics::track_db_operation;
use crate::models::AttemptEvent;

/// Sink for analytics events. The pipeline never waits on its outcome beyond
/// logging a failure.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, event: AttemptEvent) -> Result<()>;
}

pub struct MongoEventRecorder {
    mongo: Database,
}

impl MongoEventRecorder {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }
}

#[async_trait]
impl EventRecorder for MongoEventRecorder {
    async fn record(&self, event: AttemptEvent) -> Result<()> {
        track_db_operation("insert_one", "events", async {
            self.mongo
                .collection::<AttemptEvent>("events")
                .insert_one(&event)
                .await
                .map(|_| ())
                .context("Failed to insert attempt event")
        })
        .await
    }
}

/// Writes events to the log stream only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventRecorder;

#[async_trait]
impl EventRecorder for TracingEventRecorder {
    async fn record(&self, event: AttemptEvent) -> Result<()> {
        tracing::info!(
            action = event.action.as_str(),
            user_id = %event.user_id,
            draft_id = %event.draft_id,
            is_preview = event.is_preview,
            payload = %event.payload,
            "Attempt event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventAction;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn tracing_recorder_accepts_every_event() {
        let recorder: &dyn EventRecorder = &TracingEventRecorder;
        let event = AttemptEvent {
            action: EventAction::AttemptScored,
            user_id: "learner-1".to_string(),
            draft_id: "draft-1".to_string(),
            content_id: "content-1".to_string(),
            is_preview: true,
            payload: json!({ "attempt_score": 80.0 }),
            created_at: Utc::now(),
        };

        assert!(recorder.record(event.clone()).await.is_ok());
        assert!(recorder.record(event).await.is_ok());
    }
}
