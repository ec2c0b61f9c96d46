//! The outcome-recording activity — the terminal step of every workflow.
//!
//! Inserts the outcome row under an id derived from the workflow instance,
//! so the unbounded retries this activity runs under (and a re-delivered
//! signal after restart) land on the already-committed row instead of
//! duplicating it. Open confidence predictions are then closed with the
//! stored outcome's calibration value. Closing is best-effort: a failure
//! there is logged, not propagated, because the outcome row itself is the
//! record that must never be lost.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use trustflow_store::{OutcomeStore, OutcomeType};

use crate::error::EngineResult;

/// Inputs to one outcome-recording call.
#[derive(Debug, Clone)]
pub struct RecordOutcomeRequest {
    /// Deterministic outcome id, derived from the workflow instance.
    /// Replaying the same instance re-uses the committed row.
    pub outcome_id: String,
    pub user_id: String,
    pub session_id: String,
    pub draft_id: Option<String>,
    /// Confidence events opened during this run, to be closed here.
    pub confidence_event_ids: Vec<String>,
    pub outcome_type: OutcomeType,
    /// How the outcome was measured ("executed", "guardian_blocked", ...).
    pub signal: String,
}

/// What recording produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// The outcome row is durably committed.
    pub recorded: bool,
    pub outcome_id: String,
    pub outcome_type: OutcomeType,
    /// How many confidence events this call closed.
    pub predictions_closed: usize,
}

/// Records workflow outcomes and feeds the calibration loop.
pub struct OutcomeActivity {
    outcomes: OutcomeStore,
}

impl OutcomeActivity {
    pub fn new(outcomes: OutcomeStore) -> Self {
        Self { outcomes }
    }

    /// Record the outcome, then close this run's open predictions.
    ///
    /// Calibration follows the *stored* row: on a replay the original
    /// outcome type wins, and its events are already closed. A pending
    /// outcome (queued for review) closes nothing; its events stay open
    /// until the human decision lands.
    #[instrument(skip(self, req), fields(user_id = %req.user_id, outcome_type = %req.outcome_type))]
    pub async fn run(&self, req: &RecordOutcomeRequest) -> EngineResult<OutcomeReport> {
        let outcome = self
            .outcomes
            .insert_keyed(
                &req.outcome_id,
                &req.user_id,
                req.draft_id.as_deref(),
                req.outcome_type,
                &req.signal,
            )
            .await?;

        let mut predictions_closed = 0;
        if let Some(value) = outcome.outcome_type.calibration_value()
            && !req.confidence_event_ids.is_empty()
        {
            match self
                .outcomes
                .close_predictions(&req.confidence_event_ids, value)
                .await
            {
                Ok(closed) => predictions_closed = closed,
                Err(err) => {
                    // The outcome row is already durable; calibration can be
                    // repaired later from it.
                    warn!(
                        outcome_id = %outcome.id,
                        error = %err,
                        "failed to close confidence predictions"
                    );
                }
            }
        }

        info!(
            outcome_id = %outcome.id,
            outcome_type = %outcome.outcome_type,
            predictions_closed,
            "outcome recorded"
        );

        Ok(OutcomeReport {
            recorded: true,
            outcome_id: outcome.id,
            outcome_type: outcome.outcome_type,
            predictions_closed,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trustflow_store::Database;

    use super::*;

    async fn setup() -> (OutcomeStore, OutcomeActivity) {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = OutcomeStore::new(db);
        (store.clone(), OutcomeActivity::new(store))
    }

    fn request(outcome_type: OutcomeType, event_ids: Vec<String>) -> RecordOutcomeRequest {
        RecordOutcomeRequest {
            outcome_id: "trust-sig-1:outcome".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            draft_id: Some("d1".into()),
            confidence_event_ids: event_ids,
            outcome_type,
            signal: "executed".into(),
        }
    }

    #[tokio::test]
    async fn records_outcome_and_closes_predictions() {
        let (store, activity) = setup().await;
        let event = store
            .record_prediction("u1", "intent", 0.8, json!({}))
            .await
            .unwrap();

        let report = activity
            .run(&request(OutcomeType::Success, vec![event.id.clone()]))
            .await
            .unwrap();

        assert!(report.recorded);
        assert_eq!(report.outcome_type, OutcomeType::Success);
        assert_eq!(report.predictions_closed, 1);

        let closed = store.get_event(&event.id).await.unwrap().unwrap();
        assert_eq!(closed.actual_outcome, Some(1.0));
    }

    #[tokio::test]
    async fn failure_closes_predictions_at_zero() {
        let (store, activity) = setup().await;
        let event = store
            .record_prediction("u1", "draft", 0.9, json!({}))
            .await
            .unwrap();

        activity
            .run(&request(OutcomeType::Failure, vec![event.id.clone()]))
            .await
            .unwrap();

        let closed = store.get_event(&event.id).await.unwrap().unwrap();
        assert_eq!(closed.actual_outcome, Some(0.0));
    }

    #[tokio::test]
    async fn pending_outcome_leaves_predictions_open() {
        let (store, activity) = setup().await;
        let event = store
            .record_prediction("u1", "intent", 0.6, json!({}))
            .await
            .unwrap();

        let report = activity
            .run(&request(OutcomeType::Pending, vec![event.id.clone()]))
            .await
            .unwrap();

        assert_eq!(report.predictions_closed, 0);
        let open = store.get_event(&event.id).await.unwrap().unwrap();
        assert!(open.actual_outcome.is_none());
        // The outcome row itself still landed.
        assert_eq!(store.count_for_user("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_event_ids_do_not_fail_the_activity() {
        let (store, activity) = setup().await;

        let report = activity
            .run(&request(OutcomeType::Rejected, vec!["missing".into()]))
            .await
            .unwrap();

        assert_eq!(report.predictions_closed, 0);
        assert_eq!(store.count_for_user("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retried_recording_keeps_one_outcome_row() {
        let (store, activity) = setup().await;
        let event = store
            .record_prediction("u1", "intent", 0.8, json!({}))
            .await
            .unwrap();

        // A retried attempt re-delivers the identical request.
        let req = request(OutcomeType::Success, vec![event.id.clone()]);
        let first = activity.run(&req).await.unwrap();
        let second = activity.run(&req).await.unwrap();

        assert_eq!(first.outcome_id, second.outcome_id);
        assert!(second.recorded);
        assert_eq!(store.count_for_user("u1").await.unwrap(), 1);

        // The original calibration value stands.
        assert_eq!(first.predictions_closed, 1);
        assert_eq!(second.predictions_closed, 0);
        let closed = store.get_event(&event.id).await.unwrap().unwrap();
        assert_eq!(closed.actual_outcome, Some(1.0));
    }

    #[tokio::test]
    async fn replay_with_divergent_type_keeps_the_stored_outcome() {
        let (store, activity) = setup().await;
        let event = store
            .record_prediction("u1", "intent", 0.8, json!({}))
            .await
            .unwrap();

        activity
            .run(&request(OutcomeType::Success, vec![event.id.clone()]))
            .await
            .unwrap();
        let replay = activity
            .run(&request(OutcomeType::Failure, vec![event.id.clone()]))
            .await
            .unwrap();

        // The committed row wins over the replayed request.
        assert_eq!(replay.outcome_type, OutcomeType::Success);
        assert_eq!(store.count_for_user("u1").await.unwrap(), 1);
        let closed = store.get_event(&event.id).await.unwrap().unwrap();
        assert_eq!(closed.actual_outcome, Some(1.0));
    }
}
