//! Durable trust-workflow orchestration.
//!
//! Turns external signals into exactly-once autonomous actions, gated by
//! the user's earned autonomy level and a guardian safety verdict, with
//! every run terminating in a recorded outcome that feeds confidence
//! calibration.
//!
//! ```text
//!  Signal ──► TrustWorkflow (one instance per signal)
//!               │
//!               ├─ cognition        CognitionAdapter (external)
//!               ├─ persist draft    trustflow-store
//!               ├─ map decision     guardian::map_decision (pure)
//!               ├─ execute ─────── 4 gates, idempotency ledger
//!               │   or queue ───── review queue + notification
//!               │   or block
//!               └─ record outcome  unbounded retries, closes predictions
//! ```
//!
//! Activities are the only suspension points; the [`runtime::DurableRuntime`]
//! wraps each in timeouts and capped-exponential retries, and the activities
//! themselves are written to be safely re-invoked.

pub mod activities;
pub mod cognition;
pub mod config;
pub mod error;
pub mod guardian;
pub mod policy;
pub mod runtime;
pub mod signal;
pub mod workflow;

pub use activities::{
    EffectHandler, ExecuteRequest, ExecutionActivity, ExecutionReport, ExecutionStatus,
    NoopNotifier, Notifier, OutcomeActivity, OutcomeReport, RecordOutcomeRequest, ReviewActivity,
    ReviewReport, ReviewRequestInput,
};
pub use cognition::{CognitionAdapter, CognitionOutput, ConfidencePrediction, DraftProposal};
pub use config::{EngineConfig, RetryConfig};
pub use error::{EngineError, EngineResult};
pub use guardian::{
    ConstraintHit, ConstraintSeverity, GuardianDecision, RequiredAction, map_decision,
};
pub use policy::AutonomyPolicy;
pub use runtime::{ActivityOptions, DurableRuntime, RetryPolicy};
pub use signal::{Intent, Signal, UserContext};
pub use workflow::{TerminalBranch, TrustWorkflow, WorkflowOutput, WorkflowState};
