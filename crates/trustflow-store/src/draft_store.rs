//! Draft persistence.
//!
//! A draft is a proposed action produced by the cognition step, keyed by a
//! stable draft identifier. Persistence is upsert-only: re-persisting the
//! same draft id refreshes its content but never clobbers a status the
//! workflow has already advanced (e.g. `auto_executed`).

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Lifecycle status of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    /// Waiting for a human decision in the review queue.
    PendingReview,
    /// Approved by a human reviewer.
    Approved,
    /// Rejected by a human reviewer or blocked by the guardian.
    Rejected,
    /// Executed autonomously by the workflow.
    AutoExecuted,
}

impl DraftStatus {
    /// The string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AutoExecuted => "auto_executed",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_review" => Some(Self::PendingReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "auto_executed" => Some(Self::AutoExecuted),
            _ => None,
        }
    }
}

impl std::fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDraft {
    /// Stable draft identifier (assigned by cognition).
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Action type this draft proposes (e.g. "draft_email", "send_email").
    pub draft_type: String,
    /// Short human-readable title.
    pub title: String,
    /// JSON content of the proposed action.
    pub content: serde_json::Value,
    /// Cognition's confidence in this draft, 0.0–1.0.
    pub confidence: f64,
    /// Current lifecycle status.
    pub status: DraftStatus,
    /// Session the draft belongs to.
    pub session_id: String,
    /// Unix timestamp when first persisted.
    pub created_at: i64,
    /// Unix timestamp of the last upsert or status change.
    pub updated_at: i64,
    /// Unix timestamp of autonomous execution, if any.
    pub executed_at: Option<i64>,
}

/// Fields supplied when persisting a draft.
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub id: String,
    pub user_id: String,
    pub draft_type: String,
    pub title: String,
    pub content: serde_json::Value,
    pub confidence: f64,
    pub session_id: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  DraftStore
// ═══════════════════════════════════════════════════════════════════════

/// Upsert-only repository for drafts.
#[derive(Clone)]
pub struct DraftStore {
    db: Database,
}

impl DraftStore {
    /// Create a new draft store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a draft, keyed by its own id.
    ///
    /// Idempotent: a repeated upsert refreshes title, content, confidence
    /// and `updated_at` but leaves `status`, `created_at` and `executed_at`
    /// untouched, so a workflow replay cannot rewind a draft's lifecycle.
    /// New drafts start in `pending_review`.
    #[instrument(skip(self, draft), fields(draft_id = %draft.id))]
    pub async fn upsert(&self, draft: NewDraft) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        let content_json = serde_json::to_string(&draft.content)?;

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO drafts (id, user_id, draft_type, title, content, confidence, status, session_id, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending_review', ?7, ?8, ?8) \
                     ON CONFLICT(id) DO UPDATE SET \
                        title = excluded.title, \
                        content = excluded.content, \
                        confidence = excluded.confidence, \
                        updated_at = excluded.updated_at",
                    rusqlite::params![
                        draft.id,
                        draft.user_id,
                        draft.draft_type,
                        draft.title,
                        content_json,
                        draft.confidence,
                        draft.session_id,
                        now
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!("draft persisted");
        Ok(())
    }

    /// Fetch a draft by id, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredDraft>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, user_id, draft_type, title, content, confidence, status, session_id, created_at, updated_at, executed_at \
                     FROM drafts WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok(DraftRow {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            draft_type: row.get(2)?,
                            title: row.get(3)?,
                            content: row.get(4)?,
                            confidence: row.get(5)?,
                            status: row.get(6)?,
                            session_id: row.get(7)?,
                            created_at: row.get(8)?,
                            updated_at: row.get(9)?,
                            executed_at: row.get(10)?,
                        })
                    },
                );
                match result {
                    Ok(row) => row.into_stored_draft().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Set a draft's status, optionally stamping `executed_at`.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        id: &str,
        status: DraftStatus,
        executed_at: Option<i64>,
    ) -> StoreResult<()> {
        let id = id.to_string();
        let now = chrono::Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE drafts SET status = ?2, executed_at = COALESCE(?3, executed_at), updated_at = ?4 \
                     WHERE id = ?1",
                    rusqlite::params![id, status.as_str(), executed_at, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "draft",
                        id,
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

/// Raw row data before JSON/status decoding, so the `rusqlite` row-mapping
/// closure stays infallible.
struct DraftRow {
    id: String,
    user_id: String,
    draft_type: String,
    title: String,
    content: String,
    confidence: f64,
    status: String,
    session_id: String,
    created_at: i64,
    updated_at: i64,
    executed_at: Option<i64>,
}

impl DraftRow {
    fn into_stored_draft(self) -> StoreResult<StoredDraft> {
        let content: serde_json::Value = serde_json::from_str(&self.content)?;
        let status = DraftStatus::parse(&self.status).ok_or_else(|| StoreError::NotFound {
            entity: "draft status",
            id: self.status.clone(),
        })?;

        Ok(StoredDraft {
            id: self.id,
            user_id: self.user_id,
            draft_type: self.draft_type,
            title: self.title,
            content,
            confidence: self.confidence,
            status,
            session_id: self.session_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            executed_at: self.executed_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
