//! Standing authorizations for irreversible action types.
//!
//! An irreversible action (send a message, move funds, delete data) may
//! only ever execute if the user has granted a standing, explicit
//! authorization for that exact action type — independent of autonomy
//! level. Grants are keyed by `(user_id, action_type)` and can be revoked
//! without deleting the audit trail of when they were granted.

use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::StoreResult;

/// Repository over the `action_authorizations` table.
#[derive(Clone)]
pub struct AuthorizationStore {
    db: Database,
}

impl AuthorizationStore {
    /// Create a new authorization store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Grant (or re-activate) a standing authorization.
    #[instrument(skip(self))]
    pub async fn grant(&self, user_id: &str, action_type: &str) -> StoreResult<()> {
        let user_id = user_id.to_string();
        let action_type = action_type.to_string();
        let now = chrono::Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO action_authorizations (user_id, action_type, active, granted_at) \
                     VALUES (?1, ?2, 1, ?3) \
                     ON CONFLICT(user_id, action_type) DO UPDATE SET active = 1, granted_at = ?3",
                    rusqlite::params![user_id, action_type, now],
                )?;
                Ok(())
            })
            .await?;

        debug!("authorization granted");
        Ok(())
    }

    /// Revoke a standing authorization. A no-op if none exists.
    #[instrument(skip(self))]
    pub async fn revoke(&self, user_id: &str, action_type: &str) -> StoreResult<()> {
        let user_id = user_id.to_string();
        let action_type = action_type.to_string();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE action_authorizations SET active = 0 \
                     WHERE user_id = ?1 AND action_type = ?2",
                    rusqlite::params![user_id, action_type],
                )?;
                Ok(())
            })
            .await
    }

    /// True if an active authorization exists for `(user_id, action_type)`.
    #[instrument(skip(self))]
    pub async fn is_authorized(&self, user_id: &str, action_type: &str) -> StoreResult<bool> {
        let user_id = user_id.to_string();
        let action_type = action_type.to_string();

        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM action_authorizations \
                     WHERE user_id = ?1 AND action_type = ?2 AND active = 1",
                    rusqlite::params![user_id, action_type],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
