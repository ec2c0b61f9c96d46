//! Engine error types.
//!
//! All engine subsystems surface errors through [`EngineError`]. The
//! durable runtime needs to know which failures are worth retrying, so the
//! type carries its own [`EngineError::is_retryable`] classification —
//! guardian blocks, insufficient autonomy and idempotent replays are *not*
//! errors and never appear here; they are named statuses on the activity
//! results.

use thiserror::Error;

/// Convenience alias used throughout the engine crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Unified error type for the workflow engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A persistence operation failed.
    #[error("store error: {0}")]
    Store(#[from] trustflow_store::StoreError),

    /// The cognition adapter failed to produce output.
    #[error("cognition failed: {reason}")]
    Cognition { reason: String },

    /// The effect itself failed while being applied.
    ///
    /// Re-raised so the runtime retries the whole activity; the idempotency
    /// ledger keeps a retry from double-executing once a success row has
    /// been durably committed.
    #[error("effect failed for action `{action_type}`: {reason}")]
    Effect { action_type: String, reason: String },

    /// Delivering a notification failed.
    #[error("notification failed: {reason}")]
    Notification { reason: String },

    /// An activity exceeded its timeout.
    #[error("activity `{activity}` timed out after {timeout_secs}s")]
    ActivityTimeout {
        activity: &'static str,
        timeout_secs: u64,
    },

    /// An activity failed on every allowed attempt.
    #[error("activity `{activity}` failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        activity: &'static str,
        attempts: u32,
        last_error: String,
    },

    /// A workflow instance for this signal is already in flight.
    #[error("workflow {workflow_id} is already running")]
    AlreadyRunning { workflow_id: String },

    /// Configuration loading or validation failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the durable runtime should retry the failed activity.
    ///
    /// Transient infrastructure failures (SQLite contention, blocked tasks,
    /// cognition, effect, notification, timeout) are retryable. Store
    /// errors that describe the data rather than the infrastructure —
    /// missing rows, invalid transitions, corrupt columns — are terminal:
    /// no number of retries makes a missing draft appear. Exhausted
    /// retries, duplicate instances and config problems are not retried
    /// either.
    pub fn is_retryable(&self) -> bool {
        use trustflow_store::StoreError;

        match self {
            Self::Store(err) => matches!(
                err,
                StoreError::Sqlite(_) | StoreError::TaskJoin(_)
            ),
            Self::Cognition { .. }
            | Self::Effect { .. }
            | Self::Notification { .. }
            | Self::ActivityTimeout { .. } => true,
            Self::RetriesExhausted { .. }
            | Self::AlreadyRunning { .. }
            | Self::Config { .. }
            | Self::Json(_) => false,
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(
            EngineError::Cognition {
                reason: "upstream 503".into()
            }
            .is_retryable()
        );
        assert!(
            EngineError::Effect {
                action_type: "send_email".into(),
                reason: "smtp timeout".into()
            }
            .is_retryable()
        );
        assert!(
            EngineError::ActivityTimeout {
                activity: "execute_draft_action",
                timeout_secs: 120
            }
            .is_retryable()
        );
    }

    #[test]
    fn store_errors_split_on_infrastructure_vs_data() {
        use trustflow_store::StoreError;

        assert!(
            EngineError::Store(StoreError::TaskJoin("worker died".into())).is_retryable()
        );
        // Data-shaped failures are terminal: retrying cannot fix them.
        assert!(
            !EngineError::Store(StoreError::NotFound {
                entity: "draft",
                id: "d1".into()
            })
            .is_retryable()
        );
        assert!(
            !EngineError::Store(StoreError::InvalidTransition {
                entity: "review request",
                id: "r1".into(),
                message: "already resolved".into()
            })
            .is_retryable()
        );
        assert!(
            !EngineError::Store(StoreError::Conflict {
                entity: "execution",
                key: "wf:d1".into()
            })
            .is_retryable()
        );
    }

    #[test]
    fn terminal_failures_are_not_retryable() {
        assert!(
            !EngineError::RetriesExhausted {
                activity: "cognition",
                attempts: 5,
                last_error: "boom".into()
            }
            .is_retryable()
        );
        assert!(
            !EngineError::AlreadyRunning {
                workflow_id: "trust-sig-1".into()
            }
            .is_retryable()
        );
    }
}
