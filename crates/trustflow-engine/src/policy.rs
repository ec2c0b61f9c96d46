//! Autonomy policy — the static permission table for action types.
//!
//! Maps each action type to the minimum autonomy level a user must hold
//! before the engine may execute it unattended, and flags the action types
//! that are irreversible. Irreversible types additionally require a
//! standing [`ActionAuthorization`] grant regardless of level — their
//! listed level of 99 is effectively unreachable on its own.
//!
//! [`ActionAuthorization`]: trustflow_store::AuthorizationStore

use std::collections::{HashMap, HashSet};

/// Default minimum level for action types not listed in the table:
/// reversible scheduling and preference changes.
pub const DEFAULT_REQUIRED_LEVEL: i64 = 2;

/// Listed level for irreversible action types.
pub const IRREVERSIBLE_LEVEL: i64 = 99;

/// The static permission table.
///
/// Injectable so tests can tighten or relax the table; [`Default`] carries
/// the production tiers:
///
/// - level 1 — low-risk local-only updates
/// - level 2 — reversible scheduling/preference changes (default)
/// - level 3 — drafting outward-facing communication
/// - level 99 — send/transfer/delete/external-call actions; never executed
///   without a standing authorization
#[derive(Debug, Clone)]
pub struct AutonomyPolicy {
    min_levels: HashMap<&'static str, i64>,
    irreversible: HashSet<&'static str>,
    default_level: i64,
}

impl Default for AutonomyPolicy {
    fn default() -> Self {
        let min_levels = HashMap::from([
            // level 1 — low-risk local-only updates
            ("update_note", 1),
            ("tag_contact", 1),
            ("adjust_reminder", 1),
            // level 2 — reversible scheduling/preference changes
            ("schedule_event", 2),
            ("reschedule_event", 2),
            ("update_preference", 2),
            ("create_task", 2),
            // level 3 — drafts of outward-facing communication
            ("draft_email", 3),
            ("draft_message", 3),
            // level 99 — irreversible; requires standing authorization
            ("send_email", IRREVERSIBLE_LEVEL),
            ("send_message", IRREVERSIBLE_LEVEL),
            ("transfer_funds", IRREVERSIBLE_LEVEL),
            ("delete_data", IRREVERSIBLE_LEVEL),
            ("external_api_call", IRREVERSIBLE_LEVEL),
        ]);

        let irreversible = HashSet::from([
            "send_email",
            "send_message",
            "transfer_funds",
            "delete_data",
            "external_api_call",
        ]);

        Self {
            min_levels,
            irreversible,
            default_level: DEFAULT_REQUIRED_LEVEL,
        }
    }
}

impl AutonomyPolicy {
    /// Minimum autonomy level required to execute `action_type` unattended.
    pub fn required_level(&self, action_type: &str) -> i64 {
        self.min_levels
            .get(action_type)
            .copied()
            .unwrap_or(self.default_level)
    }

    /// Whether `action_type` is irreversible and therefore needs a
    /// standing authorization in addition to any autonomy level.
    pub fn is_irreversible(&self, action_type: &str) -> bool {
        self.irreversible.contains(action_type)
    }

    /// A policy with custom entries — test and deployment override hook.
    pub fn with_entries(
        min_levels: HashMap<&'static str, i64>,
        irreversible: HashSet<&'static str>,
        default_level: i64,
    ) -> Self {
        Self {
            min_levels,
            irreversible,
            default_level,
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
