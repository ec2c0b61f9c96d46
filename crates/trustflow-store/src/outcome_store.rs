//! Outcome and calibration-history persistence.
//!
//! Every workflow run eventually produces exactly one [`Outcome`] row.
//! Confidence events are the other half of the calibration loop: cognition
//! records a prediction, and the outcome recorder later closes it with the
//! measured result. Closed events are append-only — `actual_outcome` is
//! never overwritten; corrections create new events.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// What ultimately happened to a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    /// The action executed and achieved its goal.
    Success,
    /// Succeeded, but only after its deadline passed.
    SuccessAfterTimeout,
    /// Partially achieved its goal.
    Partial,
    /// The user modified the action before it took effect.
    Modified,
    /// Timed out without a result.
    Timeout,
    /// Blocked by the guardian or rejected by a reviewer.
    Rejected,
    /// The effect failed.
    Failure,
    /// Queued for human review; a later human-driven flow resolves it.
    Pending,
}

impl OutcomeType {
    /// The string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SuccessAfterTimeout => "success_after_timeout",
            Self::Partial => "partial",
            Self::Modified => "modified",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::Failure => "failure",
            Self::Pending => "pending",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "success_after_timeout" => Some(Self::SuccessAfterTimeout),
            "partial" => Some(Self::Partial),
            "modified" => Some(Self::Modified),
            "timeout" => Some(Self::Timeout),
            "rejected" => Some(Self::Rejected),
            "failure" => Some(Self::Failure),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    /// The fixed calibration scale.
    ///
    /// `Pending` has no value: a queued run's confidence events stay open
    /// until human review resolves them.
    pub fn calibration_value(&self) -> Option<f64> {
        match self {
            Self::Success => Some(1.0),
            Self::SuccessAfterTimeout => Some(0.9),
            Self::Modified => Some(0.8),
            Self::Partial => Some(0.7),
            Self::Timeout => Some(0.3),
            Self::Rejected => Some(0.2),
            Self::Failure => Some(0.0),
            Self::Pending => None,
        }
    }
}

impl std::fmt::Display for OutcomeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded workflow outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub user_id: String,
    pub draft_id: Option<String>,
    pub outcome_type: OutcomeType,
    /// Free-form signal describing how the outcome was measured.
    pub outcome_signal: String,
    pub measured_at: i64,
}

/// A confidence prediction, later closed with the measured outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceEvent {
    pub id: String,
    pub user_id: String,
    /// Which cognition node produced the prediction.
    pub node: String,
    pub predicted_confidence: f64,
    pub context: serde_json::Value,
    pub created_at: i64,
    pub actual_outcome: Option<f64>,
    pub outcome_measured_at: Option<i64>,
}

// ═══════════════════════════════════════════════════════════════════════
//  OutcomeStore
// ═══════════════════════════════════════════════════════════════════════

/// Repository over the `outcomes` and `confidence_events` tables.
#[derive(Clone)]
pub struct OutcomeStore {
    db: Database,
}

impl OutcomeStore {
    /// Create a new outcome store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an outcome row and return it.
    #[instrument(skip(self))]
    pub async fn insert(
        &self,
        user_id: &str,
        draft_id: Option<&str>,
        outcome_type: OutcomeType,
        outcome_signal: &str,
    ) -> StoreResult<Outcome> {
        let outcome = Outcome {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            draft_id: draft_id.map(|s| s.to_string()),
            outcome_type,
            outcome_signal: outcome_signal.to_string(),
            measured_at: chrono::Utc::now().timestamp(),
        };
        let row = outcome.clone();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO outcomes (id, user_id, draft_id, outcome_type, outcome_signal, measured_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        row.id,
                        row.user_id,
                        row.draft_id,
                        row.outcome_type.as_str(),
                        row.outcome_signal,
                        row.measured_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(outcome_id = %outcome.id, outcome_type = %outcome.outcome_type, "outcome recorded");
        Ok(outcome)
    }

    /// Record an outcome under a caller-chosen id, keeping replays safe.
    ///
    /// The outcome activity derives the id deterministically from the
    /// workflow instance, so a retried or re-delivered recording hits
    /// `ON CONFLICT DO NOTHING` instead of duplicating the run's single
    /// outcome row. Returns the stored outcome (the original one, if this
    /// was a replay).
    #[instrument(skip(self))]
    pub async fn insert_keyed(
        &self,
        id: &str,
        user_id: &str,
        draft_id: Option<&str>,
        outcome_type: OutcomeType,
        outcome_signal: &str,
    ) -> StoreResult<Outcome> {
        let id = id.to_string();
        let row_id = id.clone();
        let user_id = user_id.to_string();
        let draft_id = draft_id.map(|s| s.to_string());
        let outcome_signal = outcome_signal.to_string();
        let now = chrono::Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO outcomes (id, user_id, draft_id, outcome_type, outcome_signal, measured_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT(id) DO NOTHING",
                    rusqlite::params![
                        row_id,
                        user_id,
                        draft_id,
                        outcome_type.as_str(),
                        outcome_signal,
                        now
                    ],
                )?;
                Ok(())
            })
            .await?;

        self.get(&id).await?.ok_or(StoreError::NotFound {
            entity: "outcome",
            id,
        })
    }

    /// Fetch an outcome by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<Outcome>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, user_id, draft_id, outcome_type, outcome_signal, measured_at \
                     FROM outcomes WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                        ))
                    },
                );
                match result {
                    Ok((id, user_id, draft_id, outcome_type, outcome_signal, measured_at)) => {
                        let outcome_type = OutcomeType::parse(&outcome_type).ok_or_else(|| {
                            StoreError::NotFound {
                                entity: "outcome type",
                                id: outcome_type.clone(),
                            }
                        })?;
                        Ok(Some(Outcome {
                            id,
                            user_id,
                            draft_id,
                            outcome_type,
                            outcome_signal,
                            measured_at,
                        }))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Record a fresh confidence prediction (open — no actual outcome yet).
    #[instrument(skip(self, context))]
    pub async fn record_prediction(
        &self,
        user_id: &str,
        node: &str,
        predicted_confidence: f64,
        context: serde_json::Value,
    ) -> StoreResult<ConfidenceEvent> {
        let event = ConfidenceEvent {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            node: node.to_string(),
            predicted_confidence,
            context,
            created_at: chrono::Utc::now().timestamp(),
            actual_outcome: None,
            outcome_measured_at: None,
        };
        let row = event.clone();
        let context_json = serde_json::to_string(&row.context)?;

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO confidence_events (id, user_id, node, predicted_confidence, context, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        row.id,
                        row.user_id,
                        row.node,
                        row.predicted_confidence,
                        context_json,
                        row.created_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(event)
    }

    /// Record a prediction under a caller-chosen id, keeping replays safe.
    ///
    /// The cognition activity derives deterministic ids from the workflow
    /// instance, so re-invoking it on replay hits `ON CONFLICT DO NOTHING`
    /// instead of duplicating calibration rows. Returns the stored event
    /// (the original one, if this was a replay).
    #[instrument(skip(self, context))]
    pub async fn record_prediction_keyed(
        &self,
        id: &str,
        user_id: &str,
        node: &str,
        predicted_confidence: f64,
        context: serde_json::Value,
    ) -> StoreResult<ConfidenceEvent> {
        let id = id.to_string();
        let row_id = id.clone();
        let user_id = user_id.to_string();
        let node = node.to_string();
        let context_json = serde_json::to_string(&context)?;
        let now = chrono::Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO confidence_events (id, user_id, node, predicted_confidence, context, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT(id) DO NOTHING",
                    rusqlite::params![
                        row_id,
                        user_id,
                        node,
                        predicted_confidence,
                        context_json,
                        now
                    ],
                )?;
                Ok(())
            })
            .await?;

        self.get_event(&id).await?.ok_or(StoreError::NotFound {
            entity: "confidence event",
            id,
        })
    }

    /// Close the referenced predictions with a measured calibration value.
    ///
    /// Only events whose `actual_outcome` is still NULL are touched, so a
    /// replayed outcome activity cannot rewrite calibration history.
    /// Returns the number of events actually closed.
    #[instrument(skip(self, event_ids))]
    pub async fn close_predictions(&self, event_ids: &[String], value: f64) -> StoreResult<usize> {
        let ids = event_ids.to_vec();
        let now = chrono::Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let mut closed = 0usize;
                for id in &ids {
                    closed += conn.execute(
                        "UPDATE confidence_events \
                         SET actual_outcome = ?2, outcome_measured_at = ?3 \
                         WHERE id = ?1 AND actual_outcome IS NULL",
                        rusqlite::params![id, value, now],
                    )?;
                }
                Ok(closed)
            })
            .await
    }

    /// Fetch a confidence event by id.
    #[instrument(skip(self))]
    pub async fn get_event(&self, id: &str) -> StoreResult<Option<ConfidenceEvent>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, user_id, node, predicted_confidence, context, created_at, actual_outcome, outcome_measured_at \
                     FROM confidence_events WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, f64>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, Option<f64>>(6)?,
                            row.get::<_, Option<i64>>(7)?,
                        ))
                    },
                );
                match result {
                    Ok((id, user_id, node, predicted, context, created_at, actual, measured)) => {
                        let context: serde_json::Value = serde_json::from_str(&context)?;
                        Ok(Some(ConfidenceEvent {
                            id,
                            user_id,
                            node,
                            predicted_confidence: predicted,
                            context,
                            created_at,
                            actual_outcome: actual,
                            outcome_measured_at: measured,
                        }))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Count recorded outcomes for a user (test and calibration helper).
    #[instrument(skip(self))]
    pub async fn count_for_user(&self, user_id: &str) -> StoreResult<i64> {
        let user_id = user_id.to_string();
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM outcomes WHERE user_id = ?1",
                    rusqlite::params![user_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
