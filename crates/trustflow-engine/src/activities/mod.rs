//! Workflow activities — the retryable, idempotent units of work the
//! orchestrator sequences.
//!
//! Each activity takes its stores by injection so it remains independently
//! testable and swappable under test doubles; none holds shared mutable
//! state beyond what the stores enforce.

pub mod execute;
pub mod outcome;
pub mod review;

pub use execute::{EffectHandler, ExecuteRequest, ExecutionActivity, ExecutionReport, ExecutionStatus};
pub use outcome::{OutcomeActivity, OutcomeReport, RecordOutcomeRequest};
pub use review::{NoopNotifier, Notifier, ReviewActivity, ReviewReport, ReviewRequestInput};
