use std::sync::Arc;

use crate::error::{AttemptError, EngineResult};
use crate::metrics::ATTEMPTS_RECONCILED_TOTAL;
use crate::models::{Assessment, Attempt, AttemptState, ContentNode, ReviewPolicy};
use crate::services::locks::AttemptLocks;
use crate::store::{attempts_on_track, AttemptStore};

/// Refreshes a frozen selection tree from the live question bank.
///
/// Question leaves are replaced wholesale by their live definition (same id);
/// every other node keeps its own fields and has its children refreshed. Tree
/// shape and leaf order never change. A question missing from the live bank
/// keeps its frozen content.
pub fn refresh(selection: &[ContentNode], live_bank: &ContentNode) -> Vec<ContentNode> {
    selection
        .iter()
        .map(|node| refresh_node(node, live_bank))
        .collect()
}

fn refresh_node(node: &ContentNode, live_bank: &ContentNode) -> ContentNode {
    if node.is_question() {
        return match live_bank.find(&node.id) {
            Some(live) => live.clone(),
            None => {
                tracing::warn!(
                    question_id = %node.id,
                    "Question missing from live bank, keeping frozen copy"
                );
                node.clone()
            }
        };
    }

    ContentNode {
        id: node.id.clone(),
        node_type: node.node_type.clone(),
        content: node.content.clone(),
        children: refresh(&node.children, live_bank),
    }
}

pub fn refresh_state(state: &AttemptState, live_bank: &ContentNode) -> AttemptState {
    AttemptState {
        chosen: refresh(&state.chosen, live_bank),
        questions: refresh(&state.questions, live_bank),
    }
}

pub struct ReviewReconciler {
    store: Arc<dyn AttemptStore>,
    locks: AttemptLocks,
}

impl ReviewReconciler {
    pub fn new(store: Arc<dyn AttemptStore>, locks: AttemptLocks) -> Self {
        Self { store, locks }
    }

    /// Applies the assessment's review policy after `attempt` completed and
    /// returns how many attempts had their state rewritten.
    pub async fn reconcile(
        &self,
        assessment: &Assessment,
        attempt: &Attempt,
    ) -> EngineResult<usize> {
        let targets: Vec<String> = match assessment.review_policy()? {
            ReviewPolicy::Never => return Ok(0),
            ReviewPolicy::Always => vec![attempt.id.clone()],
            ReviewPolicy::NoAttemptsRemaining => {
                let limit = assessment.attempt_limit;
                if !limit.is_last_attempt(attempt.attempt_number) {
                    return Ok(0);
                }
                // Every past attempt becomes reviewable at once.
                attempts_on_track(self.store.as_ref(), attempt)
                    .await?
                    .into_iter()
                    .filter(Attempt::is_finished)
                    .map(|a| a.id)
                    .collect()
            }
        };

        let live_bank = &assessment.question_bank;
        let mut reconciled = 0;
        for attempt_id in &targets {
            match self.reconcile_one(attempt_id, live_bank).await {
                Ok(()) => reconciled += 1,
                Err(e) => tracing::error!(
                    attempt_id = %attempt_id,
                    error = %e,
                    "Failed to reconcile attempt for review"
                ),
            }
        }

        tracing::info!(
            attempt_id = %attempt.id,
            policy = %assessment.review,
            reconciled,
            targets = targets.len(),
            "Review reconciliation finished"
        );
        Ok(reconciled)
    }

    async fn reconcile_one(&self, attempt_id: &str, live_bank: &ContentNode) -> EngineResult<()> {
        let guard = self.locks.acquire(attempt_id).await?;
        let outcome = self.rewrite_state(attempt_id, live_bank).await;
        guard.release().await?;
        outcome
    }

    async fn rewrite_state(&self, attempt_id: &str, live_bank: &ContentNode) -> EngineResult<()> {
        let Some(attempt) = self.store.get_attempt(attempt_id).await? else {
            return Err(AttemptError::AttemptNotFound(attempt_id.to_string()));
        };
        let refreshed = refresh_state(&attempt.state, live_bank);
        self.store
            .update_attempt_state(attempt_id, refreshed)
            .await?;
        ATTEMPTS_RECONCILED_TOTAL.inc();
        Ok(())
    }
}
