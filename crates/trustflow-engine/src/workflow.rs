//! The trust workflow orchestrator.
//!
//! One workflow instance per signal, identified deterministically as
//! `trust-{signal_id}`. The orchestrator sequences the activities through a
//! linear state machine:
//!
//! ```text
//! ingested → cognition_done → draft_persisted ─┬→ executing → executed ─┐
//!                                              ├→ queuing   → queued   ─┼→ outcome_recorded
//!                                              └→ blocked   ────────────┘
//! ```
//!
//! Every run terminates in `outcome_recorded` — including gate refusals and
//! execution failures, which record their outcome instead of erroring out.
//! A re-delivered signal replays the completed instance's output; a signal
//! whose instance is still in flight is refused.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use trustflow_store::{
    AuthorizationStore, Database, DraftStatus, DraftStore, ExecutionLog, NewDraft, OutcomeStore,
    OutcomeType, ReviewPriority, ReviewStore,
};

use crate::activities::execute::{EffectHandler, ExecuteRequest, ExecutionActivity};
use crate::activities::outcome::{OutcomeActivity, RecordOutcomeRequest};
use crate::activities::review::{Notifier, ReviewActivity, ReviewRequestInput};
use crate::activities::{ExecutionReport, ExecutionStatus};
use crate::cognition::{CognitionAdapter, CognitionOutput};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::guardian::{GuardianDecision, RequiredAction, map_decision};
use crate::policy::AutonomyPolicy;
use crate::runtime::DurableRuntime;
use crate::signal::{Intent, Signal, UserContext};

// ---------------------------------------------------------------------------
// States and output
// ---------------------------------------------------------------------------

/// Where a workflow instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Ingested,
    CognitionDone,
    DraftPersisted,
    Executing,
    Executed,
    Queuing,
    Queued,
    Blocked,
    OutcomeRecorded,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingested => "ingested",
            Self::CognitionDone => "cognition_done",
            Self::DraftPersisted => "draft_persisted",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Queuing => "queuing",
            Self::Queued => "queued",
            Self::Blocked => "blocked",
            Self::OutcomeRecorded => "outcome_recorded",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which terminal branch the instance took before recording its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalBranch {
    Executed,
    Queued,
    Blocked,
}

/// Everything one completed workflow instance produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutput {
    pub workflow_id: String,
    pub signal_id: String,
    pub user_id: String,
    pub session_id: String,
    pub intent: Intent,
    pub draft_id: Option<String>,
    pub execution: Option<ExecutionReport>,
    pub review_request_id: Option<String>,
    pub outcome_id: String,
    pub outcome_type: OutcomeType,
    pub terminal_branch: TerminalBranch,
    pub final_state: WorkflowState,
}

/// Registry slot for one workflow instance.
enum RunSlot {
    InFlight,
    Completed(Arc<WorkflowOutput>),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Orchestrates the signal-to-outcome pipeline.
pub struct TrustWorkflow {
    cognition: Arc<dyn CognitionAdapter>,
    drafts: DraftStore,
    outcomes: OutcomeStore,
    execution: ExecutionActivity,
    review: ReviewActivity,
    outcome: OutcomeActivity,
    runtime: DurableRuntime,
    config: EngineConfig,
    runs: DashMap<String, RunSlot>,
}

impl TrustWorkflow {
    /// Wire the orchestrator over one database and its collaborators.
    pub fn new(
        db: Database,
        cognition: Arc<dyn CognitionAdapter>,
        effect: Arc<dyn EffectHandler>,
        notifier: Arc<dyn Notifier>,
        policy: AutonomyPolicy,
        config: EngineConfig,
    ) -> Self {
        let drafts = DraftStore::new(db.clone());
        let outcomes = OutcomeStore::new(db.clone());
        let execution = ExecutionActivity::new(
            drafts.clone(),
            ExecutionLog::new(db.clone()),
            AuthorizationStore::new(db.clone()),
            policy,
            effect,
        );
        let review = ReviewActivity::new(drafts.clone(), ReviewStore::new(db), notifier);
        let outcome = OutcomeActivity::new(outcomes.clone());

        Self {
            cognition,
            drafts,
            outcomes,
            execution,
            review,
            outcome,
            runtime: DurableRuntime::new(),
            config,
            runs: DashMap::new(),
        }
    }

    /// Process one signal end to end.
    ///
    /// A signal whose instance already completed returns the recorded
    /// output without re-running anything. A signal whose instance is
    /// still in flight returns [`EngineError::AlreadyRunning`].
    #[instrument(skip(self, signal, ctx), fields(signal_id = %signal.id, user_id = %ctx.user_id))]
    pub async fn process_signal(
        &self,
        signal: &Signal,
        ctx: &UserContext,
    ) -> EngineResult<Arc<WorkflowOutput>> {
        let workflow_id = signal.workflow_id();

        match self.runs.entry(workflow_id.clone()) {
            Entry::Occupied(slot) => match slot.get() {
                RunSlot::Completed(output) => {
                    info!(workflow_id = %workflow_id, "re-delivered signal, replaying recorded output");
                    return Ok(Arc::clone(output));
                }
                RunSlot::InFlight => {
                    return Err(EngineError::AlreadyRunning { workflow_id });
                }
            },
            Entry::Vacant(slot) => {
                slot.insert(RunSlot::InFlight);
            }
        }

        match self.run_instance(&workflow_id, signal, ctx).await {
            Ok(output) => {
                let output = Arc::new(output);
                self.runs
                    .insert(workflow_id, RunSlot::Completed(Arc::clone(&output)));
                Ok(output)
            }
            Err(err) => {
                // Free the slot so a re-delivery can retry the instance.
                self.runs.remove(&workflow_id);
                Err(err)
            }
        }
    }

    async fn run_instance(
        &self,
        workflow_id: &str,
        signal: &Signal,
        ctx: &UserContext,
    ) -> EngineResult<WorkflowOutput> {
        let opts = self.config.activity_options();
        let mut state = WorkflowState::Ingested;
        info!(workflow_id, state = %state, "workflow instance started");

        // Cognition.
        let cognition: CognitionOutput = self
            .runtime
            .run_activity("cognition", &opts, || async {
                self.cognition.process_signal(signal, ctx).await
            })
            .await?;
        state = WorkflowState::CognitionDone;
        debug!(workflow_id, state = %state, intent = %cognition.intent.description, "cognition complete");

        // Record this run's confidence predictions under deterministic ids
        // so a replayed instance cannot duplicate calibration rows.
        let mut event_ids = Vec::with_capacity(cognition.predictions.len());
        for (i, prediction) in cognition.predictions.iter().enumerate() {
            let event_id = format!("{workflow_id}:{}:{i}", prediction.node);
            self.runtime
                .run_activity("record_prediction", &opts, || {
                    let event_id = event_id.clone();
                    let prediction = prediction.clone();
                    async move {
                        self.outcomes
                            .record_prediction_keyed(
                                &event_id,
                                &ctx.user_id,
                                &prediction.node,
                                prediction.predicted_confidence,
                                prediction.context,
                            )
                            .await?;
                        Ok(())
                    }
                })
                .await?;
            event_ids.push(event_id);
        }

        // No draft: nothing to authorize, the run terminates as rejected.
        let Some(draft) = cognition.draft else {
            debug!(workflow_id, "cognition proposed no draft");
            return self
                .finish(
                    workflow_id,
                    signal,
                    ctx,
                    &cognition.session_id,
                    cognition.intent,
                    None,
                    None,
                    None,
                    event_ids,
                    OutcomeType::Rejected,
                    "no_draft",
                    TerminalBranch::Blocked,
                )
                .await;
        };

        // Persist the draft. Upsert by its stable id, so a replay refreshes
        // content without resetting authorization state.
        let new_draft = NewDraft {
            id: draft.id.clone(),
            user_id: ctx.user_id.clone(),
            draft_type: draft.draft_type.clone(),
            title: draft.title.clone(),
            content: draft.content.clone(),
            confidence: draft.confidence,
            session_id: cognition.session_id.clone(),
        };
        self.runtime
            .run_activity("persist_draft", &opts, || {
                let new_draft = new_draft.clone();
                async move {
                    self.drafts.upsert(new_draft).await?;
                    Ok(())
                }
            })
            .await?;
        state = WorkflowState::DraftPersisted;
        debug!(workflow_id, state = %state, draft_id = %draft.id, "draft persisted");

        // Normalize the guardian verdict. Pure, so no activity wrapper.
        let decision = map_decision(&cognition.decision);
        debug!(
            workflow_id,
            allowed = decision.allowed,
            required_action = %decision.required_action,
            "guardian decision mapped"
        );

        match decision.required_action {
            RequiredAction::Execute => {
                state = WorkflowState::Executing;
                debug!(workflow_id, state = %state, "entering execution");

                let req = ExecuteRequest {
                    draft_id: draft.id.clone(),
                    draft_type: draft.draft_type.clone(),
                    user_id: ctx.user_id.clone(),
                    autonomy_level: ctx.autonomy_level,
                    guardian_approved: serde_json::Value::Bool(decision.allowed),
                    idempotency_key: format!("{workflow_id}:{}", draft.id),
                };

                let result = self
                    .runtime
                    .run_activity("execute_draft", &opts, || async {
                        self.execution.run(&req).await
                    })
                    .await;

                let (execution, outcome_type, outcome_signal, branch) = match result {
                    Ok(report) => {
                        let (outcome_type, outcome_signal, branch) = match &report.status {
                            ExecutionStatus::Executed | ExecutionStatus::AlreadyExecuted => {
                                (OutcomeType::Success, "executed", TerminalBranch::Executed)
                            }
                            ExecutionStatus::Blocked => (
                                OutcomeType::Rejected,
                                "guardian_blocked",
                                TerminalBranch::Blocked,
                            ),
                            ExecutionStatus::AutonomyInsufficient { .. } => (
                                OutcomeType::Rejected,
                                "autonomy_insufficient",
                                TerminalBranch::Blocked,
                            ),
                            ExecutionStatus::IrreversibleNotAuthorized => (
                                OutcomeType::Rejected,
                                "irreversible_not_authorized",
                                TerminalBranch::Blocked,
                            ),
                        };
                        (Some(report), outcome_type, outcome_signal, branch)
                    }
                    Err(err) => {
                        // The effect could not be applied even with retries.
                        // The run still terminates: the failure is the
                        // outcome, not an orchestration error.
                        warn!(workflow_id, error = %err, "execution abandoned");
                        (
                            None,
                            OutcomeType::Failure,
                            "execution_failed",
                            TerminalBranch::Blocked,
                        )
                    }
                };

                self.finish(
                    workflow_id,
                    signal,
                    ctx,
                    &cognition.session_id,
                    cognition.intent,
                    Some(draft.id),
                    execution,
                    None,
                    event_ids,
                    outcome_type,
                    outcome_signal,
                    branch,
                )
                .await
            }

            RequiredAction::QueueReview => {
                state = WorkflowState::Queuing;
                debug!(workflow_id, state = %state, "queueing for review");

                let input = ReviewRequestInput {
                    draft_id: draft.id.clone(),
                    user_id: ctx.user_id.clone(),
                    session_id: cognition.session_id.clone(),
                    decision: decision.clone(),
                    priority: review_priority(&decision),
                };
                let report = self
                    .runtime
                    .run_activity("queue_review", &opts, || async {
                        self.review.run(&input).await
                    })
                    .await?;

                self.finish(
                    workflow_id,
                    signal,
                    ctx,
                    &cognition.session_id,
                    cognition.intent,
                    Some(draft.id),
                    None,
                    Some(report.review_request_id),
                    event_ids,
                    OutcomeType::Pending,
                    "queued_for_review",
                    TerminalBranch::Queued,
                )
                .await
            }

            RequiredAction::Block => {
                state = WorkflowState::Blocked;
                debug!(workflow_id, state = %state, "guardian blocked the draft");

                let draft_id = draft.id.clone();
                self.runtime
                    .run_activity("reject_draft", &opts, || {
                        let draft_id = draft_id.clone();
                        async move {
                            self.drafts
                                .set_status(&draft_id, DraftStatus::Rejected, None)
                                .await?;
                            Ok(())
                        }
                    })
                    .await?;

                self.finish(
                    workflow_id,
                    signal,
                    ctx,
                    &cognition.session_id,
                    cognition.intent,
                    Some(draft.id),
                    None,
                    None,
                    event_ids,
                    OutcomeType::Rejected,
                    "guardian_blocked",
                    TerminalBranch::Blocked,
                )
                .await
            }
        }
    }

    /// Record the run's outcome and assemble the output.
    ///
    /// Outcome recording retries without bound: every instance that reaches
    /// this point terminates in `outcome_recorded`.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        workflow_id: &str,
        signal: &Signal,
        ctx: &UserContext,
        session_id: &str,
        intent: Intent,
        draft_id: Option<String>,
        execution: Option<ExecutionReport>,
        review_request_id: Option<String>,
        confidence_event_ids: Vec<String>,
        outcome_type: OutcomeType,
        outcome_signal: &str,
        terminal_branch: TerminalBranch,
    ) -> EngineResult<WorkflowOutput> {
        let req = RecordOutcomeRequest {
            outcome_id: format!("{workflow_id}:outcome"),
            user_id: ctx.user_id.clone(),
            session_id: session_id.to_string(),
            draft_id: draft_id.clone(),
            confidence_event_ids,
            outcome_type,
            signal: outcome_signal.to_string(),
        };
        let report = self
            .runtime
            .run_activity("record_outcome", &self.config.outcome_options(), || async {
                self.outcome.run(&req).await
            })
            .await?;

        let final_state = WorkflowState::OutcomeRecorded;
        info!(
            workflow_id,
            state = %final_state,
            outcome_type = %outcome_type,
            outcome_id = %report.outcome_id,
            "workflow instance completed"
        );

        Ok(WorkflowOutput {
            workflow_id: workflow_id.to_string(),
            signal_id: signal.id.clone(),
            user_id: ctx.user_id.clone(),
            session_id: session_id.to_string(),
            intent,
            draft_id,
            execution,
            review_request_id,
            outcome_id: report.outcome_id,
            outcome_type,
            terminal_branch,
            final_state,
        })
    }
}

/// Review priority for a queued decision: a hard constraint hit escalates.
fn review_priority(decision: &GuardianDecision) -> ReviewPriority {
    if decision.constraint_hits.iter().any(|hit| hit.blocked) {
        ReviewPriority::High
    } else {
        ReviewPriority::Normal
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn state_strings_are_stable() {
        assert_eq!(WorkflowState::Ingested.to_string(), "ingested");
        assert_eq!(WorkflowState::DraftPersisted.to_string(), "draft_persisted");
        assert_eq!(WorkflowState::OutcomeRecorded.to_string(), "outcome_recorded");
    }

    #[test]
    fn hard_constraint_hits_escalate_review_priority() {
        let clean = map_decision(&json!({
            "allowed": false,
            "required_action": "queue_review",
            "constraint_checks": [{"name": "quiet_hours", "passed": true}],
        }));
        assert_eq!(review_priority(&clean), ReviewPriority::Normal);

        let hit = map_decision(&json!({
            "allowed": false,
            "required_action": "queue_review",
            "constraint_checks": [{"name": "spend_limit", "passed": false}],
        }));
        assert_eq!(review_priority(&hit), ReviewPriority::High);
    }
}
