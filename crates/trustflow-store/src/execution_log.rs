//! The idempotency ledger.
//!
//! One table answers "did this exact action already happen": a partial
//! unique index guarantees at most one successful row per idempotency key,
//! so "insert and check for conflict" is the authoritative concurrency
//! primitive — no locks, no read-then-write races. Failed attempts are
//! also logged (repeatedly, if retried) for audit.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::db::{Database, is_unique_violation};
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A recorded execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Database row id.
    pub id: i64,
    /// The idempotency key this attempt was made under.
    pub idempotency_key: String,
    /// Owning user.
    pub user_id: String,
    /// The draft whose effect was applied.
    pub draft_id: String,
    /// Action type that was executed.
    pub action_type: String,
    /// The user's autonomy level at execution time.
    pub autonomy_level: i64,
    /// Unix timestamp of the attempt.
    pub executed_at: i64,
    /// Whether the effect was applied successfully.
    pub success: bool,
    /// Error message for failed attempts.
    pub error: Option<String>,
}

/// Fields supplied when recording an attempt.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub idempotency_key: String,
    pub user_id: String,
    pub draft_id: String,
    pub action_type: String,
    pub autonomy_level: i64,
}

// ═══════════════════════════════════════════════════════════════════════
//  ExecutionLog
// ═══════════════════════════════════════════════════════════════════════

/// Repository over the `execution_log` table.
#[derive(Clone)]
pub struct ExecutionLog {
    db: Database,
}

impl ExecutionLog {
    /// Create a new execution log backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Look up the successful execution for `idempotency_key`, if any.
    ///
    /// Failed attempts are ignored — only a durably committed success
    /// makes an action "done".
    #[instrument(skip(self))]
    pub async fn find_success(&self, idempotency_key: &str) -> StoreResult<Option<ExecutionLogEntry>> {
        let key = idempotency_key.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, idempotency_key, user_id, draft_id, action_type, autonomy_level, executed_at, success, error \
                     FROM execution_log WHERE idempotency_key = ?1 AND success = 1",
                    rusqlite::params![key],
                    map_entry,
                );
                match result {
                    Ok(entry) => Ok(Some(entry)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Record a successful execution.
    ///
    /// This insert is the moment the action becomes "done". If a concurrent
    /// retry already committed a success for the same key, the unique index
    /// rejects this row and a [`StoreError::Conflict`] is returned — the
    /// caller treats that as "already executed", not as a failure.
    #[instrument(skip(self, exec), fields(idempotency_key = %exec.idempotency_key))]
    pub async fn record_success(&self, exec: NewExecution) -> StoreResult<ExecutionLogEntry> {
        let now = chrono::Utc::now().timestamp();
        let key = exec.idempotency_key.clone();

        let result = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO execution_log (idempotency_key, user_id, draft_id, action_type, autonomy_level, executed_at, success) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                    rusqlite::params![
                        exec.idempotency_key,
                        exec.user_id,
                        exec.draft_id,
                        exec.action_type,
                        exec.autonomy_level,
                        now
                    ],
                )?;
                let id = conn.last_insert_rowid();
                Ok(ExecutionLogEntry {
                    id,
                    idempotency_key: exec.idempotency_key,
                    user_id: exec.user_id,
                    draft_id: exec.draft_id,
                    action_type: exec.action_type,
                    autonomy_level: exec.autonomy_level,
                    executed_at: now,
                    success: true,
                    error: None,
                })
            })
            .await;

        match result {
            Ok(entry) => {
                debug!("execution recorded");
                Ok(entry)
            }
            Err(StoreError::Sqlite(e)) if is_unique_violation(&e) => {
                warn!(idempotency_key = %key, "concurrent execution already recorded");
                Err(StoreError::Conflict {
                    entity: "execution",
                    key,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Record a failed execution attempt. Never conflicts.
    #[instrument(skip(self, exec, error), fields(idempotency_key = %exec.idempotency_key))]
    pub async fn record_failure(&self, exec: NewExecution, error: &str) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        let error = error.to_string();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO execution_log (idempotency_key, user_id, draft_id, action_type, autonomy_level, executed_at, success, error) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                    rusqlite::params![
                        exec.idempotency_key,
                        exec.user_id,
                        exec.draft_id,
                        exec.action_type,
                        exec.autonomy_level,
                        now,
                        error
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Number of successful rows for `idempotency_key` (0 or 1 by invariant).
    #[instrument(skip(self))]
    pub async fn count_success(&self, idempotency_key: &str) -> StoreResult<i64> {
        let key = idempotency_key.to_string();
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM execution_log WHERE idempotency_key = ?1 AND success = 1",
                    rusqlite::params![key],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }
}

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionLogEntry> {
    Ok(ExecutionLogEntry {
        id: row.get(0)?,
        idempotency_key: row.get(1)?,
        user_id: row.get(2)?,
        draft_id: row.get(3)?,
        action_type: row.get(4)?,
        autonomy_level: row.get(5)?,
        executed_at: row.get(6)?,
        success: row.get(7)?,
        error: row.get(8)?,
    })
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    fn sample_exec(key: &str) -> NewExecution {
        NewExecution {
            idempotency_key: key.into(),
            user_id: "u1".into(),
            draft_id: "d1".into(),
            action_type: "schedule_event".into(),
            autonomy_level: 2,
        }
    }

    #[tokio::test]
    async fn record_and_find_success() {
        let db = setup_db().await;
        let log = ExecutionLog::new(db);

        let entry = log.record_success(sample_exec("k1")).await.unwrap();
        assert!(entry.success);
        assert!(entry.executed_at > 0);

        let found = log.find_success("k1").await.unwrap().unwrap();
        assert_eq!(found.id, entry.id);
        assert_eq!(found.executed_at, entry.executed_at);
        assert_eq!(found.action_type, "schedule_event");
    }

    #[tokio::test]
    async fn second_success_for_key_conflicts() {
        let db = setup_db().await;
        let log = ExecutionLog::new(db);

        log.record_success(sample_exec("k1")).await.unwrap();
        let dup = log.record_success(sample_exec("k1")).await;

        match dup.unwrap_err() {
            StoreError::Conflict { entity, key } => {
                assert_eq!(entity, "execution");
                assert_eq!(key, "k1");
            }
            other => panic!("expected Conflict, got: {other}"),
        }

        // Still exactly one success row.
        assert_eq!(log.count_success("k1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failures_do_not_conflict_or_satisfy_lookup() {
        let db = setup_db().await;
        let log = ExecutionLog::new(db);

        log.record_failure(sample_exec("k1"), "network down")
            .await
            .unwrap();
        log.record_failure(sample_exec("k1"), "network still down")
            .await
            .unwrap();

        // Failed attempts never make the action "done".
        assert!(log.find_success("k1").await.unwrap().is_none());

        // A success after logged failures is accepted.
        log.record_success(sample_exec("k1")).await.unwrap();
        assert!(log.find_success("k1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_success_inserts_yield_one_row() {
        let db = setup_db().await;
        let log = ExecutionLog::new(db);

        let attempts = (0..8).map(|_| {
            let log = log.clone();
            async move { log.record_success(sample_exec("race")).await }
        });
        let results = futures::future::join_all(attempts).await;

        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::Conflict { .. })))
            .count();

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(log.count_success("race").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn find_success_missing_key_is_none() {
        let db = setup_db().await;
        let log = ExecutionLog::new(db);
        assert!(log.find_success("missing").await.unwrap().is_none());
    }
}
