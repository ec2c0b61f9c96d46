//! Schema migration system.
//!
//! Migrations are static SQL strings keyed by version number. Applied
//! versions are tracked in a `_migrations` table so running migrations is
//! idempotent.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "core workflow tables — drafts, execution_log, outcomes, confidence_events",
        sql: r#"
            CREATE TABLE drafts (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                draft_type  TEXT NOT NULL,
                title       TEXT NOT NULL DEFAULT '',
                content     TEXT NOT NULL,
                confidence  REAL NOT NULL DEFAULT 0.0,
                status      TEXT NOT NULL CHECK(status IN ('pending_review','approved','rejected','auto_executed')),
                session_id  TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL,
                executed_at INTEGER
            );
            CREATE INDEX idx_drafts_user ON drafts(user_id);
            CREATE INDEX idx_drafts_session ON drafts(session_id);

            CREATE TABLE execution_log (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                idempotency_key TEXT NOT NULL,
                user_id         TEXT NOT NULL,
                draft_id        TEXT NOT NULL,
                action_type     TEXT NOT NULL,
                autonomy_level  INTEGER NOT NULL,
                executed_at     INTEGER NOT NULL,
                success         BOOLEAN NOT NULL,
                error           TEXT
            );
            -- At most one successful row per idempotency key, enforced by
            -- the storage layer. Failed attempts may repeat.
            CREATE UNIQUE INDEX idx_execution_log_success
                ON execution_log(idempotency_key) WHERE success = 1;
            CREATE INDEX idx_execution_log_key ON execution_log(idempotency_key);
            CREATE INDEX idx_execution_log_draft ON execution_log(draft_id);

            CREATE TABLE outcomes (
                id             TEXT PRIMARY KEY,
                user_id        TEXT NOT NULL,
                draft_id       TEXT,
                outcome_type   TEXT NOT NULL CHECK(outcome_type IN ('success','success_after_timeout','partial','modified','timeout','rejected','failure','pending')),
                outcome_signal TEXT NOT NULL,
                measured_at    INTEGER NOT NULL
            );
            CREATE INDEX idx_outcomes_user ON outcomes(user_id);
            CREATE INDEX idx_outcomes_draft ON outcomes(draft_id);

            CREATE TABLE confidence_events (
                id                   TEXT PRIMARY KEY,
                user_id              TEXT NOT NULL,
                node                 TEXT NOT NULL,
                predicted_confidence REAL NOT NULL,
                context              TEXT NOT NULL DEFAULT '{}',
                created_at           INTEGER NOT NULL,
                actual_outcome       REAL,
                outcome_measured_at  INTEGER
            );
            CREATE INDEX idx_confidence_events_user ON confidence_events(user_id);
        "#,
    },
    Migration {
        version: 2,
        description: "human review — review_requests and standing action_authorizations",
        sql: r#"
            CREATE TABLE review_requests (
                id                TEXT PRIMARY KEY,
                user_id           TEXT NOT NULL,
                draft_id          TEXT NOT NULL,
                session_id        TEXT NOT NULL,
                priority          TEXT NOT NULL CHECK(priority IN ('low','normal','high','urgent')),
                guardian_decision TEXT NOT NULL,
                status            TEXT NOT NULL CHECK(status IN ('pending','approved','rejected')),
                created_at        INTEGER NOT NULL
            );
            CREATE INDEX idx_review_requests_user ON review_requests(user_id);
            -- One pending request per draft; resolving frees the slot.
            CREATE UNIQUE INDEX idx_review_requests_pending
                ON review_requests(draft_id) WHERE status = 'pending';

            CREATE TABLE action_authorizations (
                user_id     TEXT NOT NULL,
                action_type TEXT NOT NULL,
                active      BOOLEAN NOT NULL DEFAULT 1,
                granted_at  INTEGER NOT NULL,
                PRIMARY KEY (user_id, action_type)
            );
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// This is a **synchronous** function — call it from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })?;
    Ok(version)
}

// ── internals ────────────────────────────────────────────────────────

/// Create the `_migrations` bookkeeping table if it does not exist.
fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })?;
    Ok(())
}

/// Apply a single migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to begin transaction: {e}"),
        })?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: format!("SQL execution failed: {e}"),
            })?;

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now],
        )
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to record migration: {e}"),
        })?;

        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| StoreError::Migration {
                    version: migration.version,
                    message: format!("failed to commit: {e}"),
                })?;
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// The expected latest migration version (update when adding migrations).
    const LATEST_VERSION: u32 = 2;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[1].version > window[0].version,
                "migration versions must be strictly increasing: {} >= {}",
                window[0].version,
                window[1].version,
            );
        }
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
                )
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };

        // v1 tables
        assert!(tables.contains(&"drafts".to_string()));
        assert!(tables.contains(&"execution_log".to_string()));
        assert!(tables.contains(&"outcomes".to_string()));
        assert!(tables.contains(&"confidence_events".to_string()));
        // v2 tables
        assert!(tables.contains(&"review_requests".to_string()));
        assert!(tables.contains(&"action_authorizations".to_string()));
    }

    #[test]
    fn execution_log_rejects_second_success_for_key() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO execution_log (idempotency_key, user_id, draft_id, action_type, autonomy_level, executed_at, success) \
             VALUES ('k1', 'u1', 'd1', 'schedule_event', 2, 0, 1)",
            [],
        )
        .unwrap();

        // A second success for the same key violates the partial index.
        let dup = conn.execute(
            "INSERT INTO execution_log (idempotency_key, user_id, draft_id, action_type, autonomy_level, executed_at, success) \
             VALUES ('k1', 'u1', 'd1', 'schedule_event', 2, 1, 1)",
            [],
        );
        assert!(dup.is_err());

        // Failed attempts for the same key are allowed, repeatedly.
        for _ in 0..2 {
            conn.execute(
                "INSERT INTO execution_log (idempotency_key, user_id, draft_id, action_type, autonomy_level, executed_at, success, error) \
                 VALUES ('k1', 'u1', 'd1', 'schedule_event', 2, 2, 0, 'boom')",
                [],
            )
            .unwrap();
        }
    }

    #[test]
    fn drafts_status_check_constraint() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO drafts (id, user_id, draft_type, content, status, session_id, created_at, updated_at) \
             VALUES ('d1', 'u1', 'draft_email', '{}', 'bogus', 's1', 0, 0)",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn one_pending_review_per_draft() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO review_requests (id, user_id, draft_id, session_id, priority, guardian_decision, status, created_at) \
             VALUES ('r1', 'u1', 'd1', 's1', 'normal', '{}', 'pending', 0)",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO review_requests (id, user_id, draft_id, session_id, priority, guardian_decision, status, created_at) \
             VALUES ('r2', 'u1', 'd1', 's1', 'normal', '{}', 'pending', 0)",
            [],
        );
        assert!(dup.is_err());

        // A resolved request frees the slot for a new pending one.
        conn.execute(
            "UPDATE review_requests SET status = 'approved' WHERE id = 'r1'",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO review_requests (id, user_id, draft_id, session_id, priority, guardian_decision, status, created_at) \
             VALUES ('r3', 'u1', 'd1', 's1', 'high', '{}', 'pending', 0)",
            [],
        )
        .unwrap();
    }
}
