//! Signal and intent domain types.
//!
//! A [`Signal`] is an external event that may warrant an autonomous action.
//! Signals are immutable once created; the workflow derives its instance
//! identity deterministically from the signal id so a re-delivered signal
//! replays the same instance instead of starting a duplicate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An incoming event from the outside world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Stable signal identifier assigned by the producer.
    pub id: String,
    /// The user this signal belongs to.
    pub user_id: String,
    /// Where the signal came from (e.g. "email", "calendar", "chat").
    pub source: String,
    /// What kind of event it is (e.g. "message_received").
    pub signal_type: String,
    /// Raw event payload.
    pub payload: serde_json::Value,
    /// Producer-supplied metadata.
    pub metadata: serde_json::Value,
    /// Unix timestamp when the signal was created.
    pub created_at: i64,
}

impl Signal {
    /// Create a signal with a fresh id and current timestamp.
    pub fn new(
        user_id: impl Into<String>,
        source: impl Into<String>,
        signal_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            source: source.into(),
            signal_type: signal_type.into(),
            payload,
            metadata: serde_json::Value::Null,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Deterministic workflow instance identity for this signal.
    ///
    /// Re-delivering the same signal always maps to the same instance.
    pub fn workflow_id(&self) -> String {
        format!("trust-{}", self.id)
    }
}

/// Cognition's reading of what the signal means.
///
/// Ephemeral — embedded in the workflow output, never independently
/// persisted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub description: String,
    pub predicted_confidence: f64,
}

/// Read-only per-user context supplied by the trust/calibration subsystem.
///
/// The engine never mutates the autonomy level; it only reads it at the
/// execution gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    /// Permission tier: 0 = observe-only, higher tiers unlock more action
    /// types.
    pub autonomy_level: i64,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, autonomy_level: i64) -> Self {
        Self {
            user_id: user_id.into(),
            autonomy_level,
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn workflow_id_is_deterministic() {
        let mut signal = Signal::new("u1", "email", "message_received", json!({}));
        signal.id = "sig-42".into();
        assert_eq!(signal.workflow_id(), "trust-sig-42");
        assert_eq!(signal.workflow_id(), signal.workflow_id());
    }

    #[test]
    fn new_signals_get_distinct_ids() {
        let a = Signal::new("u1", "email", "message_received", json!({}));
        let b = Signal::new("u1", "email", "message_received", json!({}));
        assert_ne!(a.id, b.id);
    }
}
