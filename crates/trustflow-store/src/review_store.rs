//! Human-review queue persistence.
//!
//! When the workflow is not authorized to execute a draft, it parks the
//! draft here as a [`ReviewRequest`]. The guardian decision that caused the
//! detour is attached as JSON for audit. A draft has at most one pending
//! request (unique partial index); re-queuing updates the pending row
//! instead of duplicating it.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// How urgently a human should look at a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl ReviewPriority {
    /// The string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReviewPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution state of a review request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    /// The string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A persisted review request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: String,
    pub user_id: String,
    pub draft_id: String,
    pub session_id: String,
    pub priority: ReviewPriority,
    /// The canonical guardian decision, attached as JSON for audit.
    pub guardian_decision: serde_json::Value,
    pub status: ReviewStatus,
    pub created_at: i64,
}

// ═══════════════════════════════════════════════════════════════════════
//  ReviewStore
// ═══════════════════════════════════════════════════════════════════════

/// Repository over the `review_requests` table.
#[derive(Clone)]
pub struct ReviewStore {
    db: Database,
}

impl ReviewStore {
    /// Create a new review store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Queue a draft for review, reusing any pending request for it.
    ///
    /// Idempotent in effect: re-running with the same draft id updates the
    /// pending row (priority, decision, session) and returns its id rather
    /// than creating a duplicate.
    #[instrument(skip(self, guardian_decision))]
    pub async fn upsert_pending(
        &self,
        user_id: &str,
        draft_id: &str,
        session_id: &str,
        priority: ReviewPriority,
        guardian_decision: &serde_json::Value,
    ) -> StoreResult<String> {
        let user_id = user_id.to_string();
        let draft_id = draft_id.to_string();
        let session_id = session_id.to_string();
        let decision_json = serde_json::to_string(guardian_decision)?;
        let new_id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().timestamp();

        let id = self
            .db
            .execute(move |conn| {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT id FROM review_requests WHERE draft_id = ?1 AND status = 'pending'",
                        rusqlite::params![draft_id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                match existing {
                    Some(id) => {
                        conn.execute(
                            "UPDATE review_requests \
                             SET priority = ?2, guardian_decision = ?3, session_id = ?4 \
                             WHERE id = ?1",
                            rusqlite::params![id, priority.as_str(), decision_json, session_id],
                        )?;
                        Ok(id)
                    }
                    None => {
                        conn.execute(
                            "INSERT INTO review_requests (id, user_id, draft_id, session_id, priority, guardian_decision, status, created_at) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
                            rusqlite::params![
                                new_id,
                                user_id,
                                draft_id,
                                session_id,
                                priority.as_str(),
                                decision_json,
                                now
                            ],
                        )?;
                        Ok(new_id)
                    }
                }
            })
            .await?;

        debug!(review_request_id = %id, "review request queued");
        Ok(id)
    }

    /// Fetch a review request by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<ReviewRequest>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, user_id, draft_id, session_id, priority, guardian_decision, status, created_at \
                     FROM review_requests WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok(ReviewRow {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            draft_id: row.get(2)?,
                            session_id: row.get(3)?,
                            priority: row.get(4)?,
                            guardian_decision: row.get(5)?,
                            status: row.get(6)?,
                            created_at: row.get(7)?,
                        })
                    },
                );
                match result {
                    Ok(row) => row.into_request().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Resolve a pending request (`pending → approved | rejected`).
    ///
    /// Accepting this transition is the extent of this core's involvement
    /// in human review; the decision itself arrives from outside.
    #[instrument(skip(self))]
    pub async fn set_status(&self, id: &str, status: ReviewStatus) -> StoreResult<()> {
        if status == ReviewStatus::Pending {
            return Err(StoreError::InvalidTransition {
                entity: "review request",
                id: id.to_string(),
                message: "cannot transition back to pending".into(),
            });
        }

        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE review_requests SET status = ?2 WHERE id = ?1 AND status = 'pending'",
                    rusqlite::params![id, status.as_str()],
                )?;
                if updated == 0 {
                    let exists: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM review_requests WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get(0),
                    )?;
                    if exists == 0 {
                        return Err(StoreError::NotFound {
                            entity: "review request",
                            id,
                        });
                    }
                    return Err(StoreError::InvalidTransition {
                        entity: "review request",
                        id,
                        message: "request is already resolved".into(),
                    });
                }
                Ok(())
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

struct ReviewRow {
    id: String,
    user_id: String,
    draft_id: String,
    session_id: String,
    priority: String,
    guardian_decision: String,
    status: String,
    created_at: i64,
}

impl ReviewRow {
    fn into_request(self) -> StoreResult<ReviewRequest> {
        let guardian_decision: serde_json::Value = serde_json::from_str(&self.guardian_decision)?;
        let priority =
            ReviewPriority::parse(&self.priority).ok_or_else(|| StoreError::NotFound {
                entity: "review priority",
                id: self.priority.clone(),
            })?;
        let status = ReviewStatus::parse(&self.status).ok_or_else(|| StoreError::NotFound {
            entity: "review status",
            id: self.status.clone(),
        })?;

        Ok(ReviewRequest {
            id: self.id,
            user_id: self.user_id,
            draft_id: self.draft_id,
            session_id: self.session_id,
            priority,
            guardian_decision,
            status,
            created_at: self.created_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
