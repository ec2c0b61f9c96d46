//! The execution activity — applies a draft's effect exactly once.
//!
//! Four ordered hard gates, each of which can short-circuit the run with a
//! named status (never a generic error, so the caller can explain *why*):
//!
//! 1. Guardian approval must be literally boolean `true`.
//! 2. Idempotency: a successful ledger row for the key means the action
//!    already happened — return it, do not re-execute.
//! 3. Autonomy: the user's level must meet the policy's minimum for the
//!    action type.
//! 4. Irreversibility: an irreversible action type needs an active
//!    standing authorization for this exact user and type, regardless of
//!    autonomy level.
//!
//! Only when all four pass does the effect run. The ledger insert after
//! the effect is the moment the action becomes "done"; a conflict on that
//! insert means a concurrent retry already won, which is reported as
//! `already_executed`, not as an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use trustflow_store::{
    AuthorizationStore, DraftStatus, DraftStore, ExecutionLog, NewExecution, StoreError,
    StoredDraft,
};

use crate::error::{EngineError, EngineResult};
use crate::policy::AutonomyPolicy;

// ---------------------------------------------------------------------------
// Effect handler
// ---------------------------------------------------------------------------

/// Applies a draft's effect in the outside world.
///
/// Authors of handlers are responsible for making a retry after a logged
/// failure safe — the ledger only guarantees no re-execution once a
/// success row is durably committed.
#[async_trait]
pub trait EffectHandler: Send + Sync {
    /// Apply the effect, returning a JSON description of what was done.
    async fn apply(&self, draft: &StoredDraft) -> EngineResult<serde_json::Value>;
}

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

/// Inputs to one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub draft_id: String,
    /// Action type (consulted by the autonomy policy).
    pub draft_type: String,
    pub user_id: String,
    /// The user's current autonomy level (read-only input).
    pub autonomy_level: i64,
    /// The guardian's approval, exactly as the decision carried it.
    /// Anything other than JSON boolean `true` blocks.
    pub guardian_approved: serde_json::Value,
    /// Stable key making this effect at-most-once across retries.
    pub idempotency_key: String,
}

/// Named result of the gate chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// All gates passed and the effect was applied.
    Executed,
    /// The ledger already holds a success for this key.
    AlreadyExecuted,
    /// Guardian approval was not literally `true`.
    Blocked,
    /// The user's autonomy level is below the policy minimum.
    AutonomyInsufficient { required: i64, actual: i64 },
    /// Irreversible action type without a standing authorization.
    IrreversibleNotAuthorized,
}

impl ExecutionStatus {
    /// The wire/status string reported to callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::AlreadyExecuted => "already_executed",
            Self::Blocked => "blocked",
            Self::AutonomyInsufficient { .. } => "autonomy_insufficient",
            Self::IrreversibleNotAuthorized => "irreversible_not_authorized",
        }
    }
}

/// What one execution attempt produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// The effect was applied during *this* call.
    pub executed: bool,
    /// A gate short-circuited and nothing ran.
    pub skipped: bool,
    /// The action had already happened; this call was a replay.
    pub idempotent: bool,
    pub status: ExecutionStatus,
    /// JSON description of the applied effect.
    pub action: Option<serde_json::Value>,
    /// When the effect was (originally) applied.
    pub executed_at: Option<i64>,
    pub error: Option<String>,
}

impl ExecutionReport {
    fn skipped(status: ExecutionStatus) -> Self {
        Self {
            executed: false,
            skipped: true,
            idempotent: false,
            status,
            action: None,
            executed_at: None,
            error: None,
        }
    }

    fn replayed(executed_at: i64) -> Self {
        Self {
            executed: false,
            skipped: false,
            idempotent: true,
            status: ExecutionStatus::AlreadyExecuted,
            action: None,
            executed_at: Some(executed_at),
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Applies draft effects behind the four-gate chain.
pub struct ExecutionActivity {
    drafts: DraftStore,
    log: ExecutionLog,
    authorizations: AuthorizationStore,
    policy: AutonomyPolicy,
    effect: Arc<dyn EffectHandler>,
}

impl ExecutionActivity {
    pub fn new(
        drafts: DraftStore,
        log: ExecutionLog,
        authorizations: AuthorizationStore,
        policy: AutonomyPolicy,
        effect: Arc<dyn EffectHandler>,
    ) -> Self {
        Self {
            drafts,
            log,
            authorizations,
            policy,
            effect,
        }
    }

    /// Run the gate chain and, if every gate passes, the effect.
    #[instrument(skip(self, req), fields(draft_id = %req.draft_id, idempotency_key = %req.idempotency_key))]
    pub async fn run(&self, req: &ExecuteRequest) -> EngineResult<ExecutionReport> {
        // Gate 1: guardian veto is absolute — strictly boolean true.
        if !matches!(req.guardian_approved, serde_json::Value::Bool(true)) {
            warn!(approved = %req.guardian_approved, "guardian did not approve, blocking");
            return Ok(ExecutionReport::skipped(ExecutionStatus::Blocked));
        }

        // Gate 2: did this exact action already happen?
        if let Some(entry) = self.log.find_success(&req.idempotency_key).await? {
            info!(executed_at = entry.executed_at, "idempotent replay, skipping effect");
            return Ok(ExecutionReport::replayed(entry.executed_at));
        }

        // Gate 3: autonomy tier.
        let required = self.policy.required_level(&req.draft_type);
        if req.autonomy_level < required {
            info!(
                required,
                actual = req.autonomy_level,
                "autonomy level insufficient"
            );
            return Ok(ExecutionReport::skipped(
                ExecutionStatus::AutonomyInsufficient {
                    required,
                    actual: req.autonomy_level,
                },
            ));
        }

        // Gate 4: irreversible actions need a standing grant, always.
        if self.policy.is_irreversible(&req.draft_type)
            && !self
                .authorizations
                .is_authorized(&req.user_id, &req.draft_type)
                .await?
        {
            info!(action_type = %req.draft_type, "irreversible action without authorization");
            return Ok(ExecutionReport::skipped(
                ExecutionStatus::IrreversibleNotAuthorized,
            ));
        }

        // All gates passed: apply the effect.
        let draft = self
            .drafts
            .get(&req.draft_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "draft",
                id: req.draft_id.clone(),
            })?;

        let exec = NewExecution {
            idempotency_key: req.idempotency_key.clone(),
            user_id: req.user_id.clone(),
            draft_id: req.draft_id.clone(),
            action_type: req.draft_type.clone(),
            autonomy_level: req.autonomy_level,
        };

        let action = match self.effect.apply(&draft).await {
            Ok(action) => action,
            Err(err) => {
                // Log the failed attempt, then re-raise so the runtime
                // retries the whole activity.
                self.log.record_failure(exec, &err.to_string()).await?;
                return Err(EngineError::Effect {
                    action_type: req.draft_type.clone(),
                    reason: err.to_string(),
                });
            }
        };

        match self.log.record_success(exec).await {
            Ok(entry) => {
                self.drafts
                    .set_status(&req.draft_id, DraftStatus::AutoExecuted, Some(entry.executed_at))
                    .await?;
                info!(
                    draft_id = %req.draft_id,
                    action_type = %req.draft_type,
                    executed_at = entry.executed_at,
                    "draft action executed"
                );
                Ok(ExecutionReport {
                    executed: true,
                    skipped: false,
                    idempotent: false,
                    status: ExecutionStatus::Executed,
                    action: Some(action),
                    executed_at: Some(entry.executed_at),
                    error: None,
                })
            }
            Err(StoreError::Conflict { .. }) => {
                // A concurrent retry committed first; its row is the truth.
                let entry = self
                    .log
                    .find_success(&req.idempotency_key)
                    .await?
                    .ok_or(StoreError::NotFound {
                        entity: "execution",
                        id: req.idempotency_key.clone(),
                    })?;
                Ok(ExecutionReport::replayed(entry.executed_at))
            }
            Err(err) => Err(err.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
