//! Guardian decision mapping.
//!
//! The cognition step returns a safety verdict in one of two shapes: the
//! canonical shape (explicit `required_action` plus constraint checks) or a
//! legacy shape (an overall approval flag and a free-form recommendation).
//! [`map_decision`] normalizes either into a [`GuardianDecision`].
//!
//! The mapper is pure and total: any input produces a decision. Explicit
//! disapproval maps to `block`; an ambiguous or unrecognized shape maps to
//! the least-privileged outcome, `queue_review` — ambiguity never silently
//! executes.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What the workflow must do with the draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    /// Run the execution activity (subject to its own gates).
    Execute,
    /// Park the draft for human review.
    QueueReview,
    /// Do nothing; the run terminates as rejected.
    Block,
}

impl RequiredAction {
    /// The canonical wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::QueueReview => "queue_review",
            Self::Block => "block",
        }
    }

    /// Parse from the canonical wire string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "execute" => Some(Self::Execute),
            "queue_review" => Some(Self::QueueReview),
            "block" => Some(Self::Block),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequiredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a constraint hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintSeverity {
    /// The check failed.
    Hard,
    /// The check passed but is worth surfacing.
    Soft,
}

/// A single safety constraint the guardian evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintHit {
    pub name: String,
    pub severity: ConstraintSeverity,
    /// Whether this constraint contributed to blocking the draft.
    pub blocked: bool,
}

/// The canonical safety verdict on a draft.
///
/// Derived, not primary state — persisted only as an attachment to the
/// review request or execution log for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianDecision {
    pub allowed: bool,
    pub required_action: RequiredAction,
    pub explanation: String,
    pub constraint_hits: Vec<ConstraintHit>,
}

impl GuardianDecision {
    /// JSON form for audit attachments. Infallible by construction: every
    /// field serializes.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

/// Normalize whatever the cognition adapter returned into a canonical
/// [`GuardianDecision`].
///
/// Resolution order:
/// 1. Canonical shape (`allowed` boolean + parseable `required_action`):
///    passed through field-for-field, with `constraint_checks` relabelled
///    into hits — severity `hard` iff the check failed.
/// 2. Legacy shape (`approved` flag, optional `recommendation`): allowed
///    iff `approved` is literally boolean `true`; explicit disapproval
///    blocks; an "approve" recommendation executes; anything else queues.
/// 3. Anything unrecognized: `queue_review`, never execute.
pub fn map_decision(raw: &serde_json::Value) -> GuardianDecision {
    if let Some(decision) = try_canonical(raw) {
        return decision;
    }
    if let Some(decision) = try_legacy(raw) {
        return decision;
    }

    tracing::warn!("unrecognized guardian decision shape, queueing for review");
    GuardianDecision {
        allowed: false,
        required_action: RequiredAction::QueueReview,
        explanation: "unrecognized guardian decision; queued for human review".into(),
        constraint_hits: Vec::new(),
    }
}

/// Canonical shape: `allowed` is a JSON boolean and `required_action`
/// parses.
fn try_canonical(raw: &serde_json::Value) -> Option<GuardianDecision> {
    let allowed = raw.get("allowed")?.as_bool()?;
    let required_action = RequiredAction::parse(raw.get("required_action")?.as_str()?)?;
    let explanation = raw
        .get("explanation")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let constraint_hits = raw
        .get("constraint_checks")
        .and_then(|v| v.as_array())
        .map(|checks| {
            checks
                .iter()
                .filter_map(|check| {
                    let name = check.get("name")?.as_str()?.to_string();
                    let passed = check
                        .get("passed")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    Some(ConstraintHit {
                        name,
                        severity: if passed {
                            ConstraintSeverity::Soft
                        } else {
                            ConstraintSeverity::Hard
                        },
                        blocked: !passed,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(GuardianDecision {
        allowed,
        required_action,
        explanation,
        constraint_hits,
    })
}

/// Legacy shape: an `approved` field (any JSON type) and an optional
/// `recommendation` string.
fn try_legacy(raw: &serde_json::Value) -> Option<GuardianDecision> {
    let approved = raw.get("approved")?;

    // Strictly boolean true; `"true"` as a string does not approve.
    let allowed = matches!(approved, serde_json::Value::Bool(true));

    let recommendation = raw.get("recommendation").and_then(|v| v.as_str());
    let required_action = if !allowed {
        RequiredAction::Block
    } else if recommendation == Some("approve") {
        RequiredAction::Execute
    } else {
        // Ambiguous or missing recommendation never silently executes.
        RequiredAction::QueueReview
    };

    let explanation = raw
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Some(GuardianDecision {
        allowed,
        required_action,
        explanation,
        constraint_hits: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
