//! The cognition adapter contract.
//!
//! Cognition is an external collaborator: given a signal and user context
//! it predicts an intent, proposes a draft action, renders a guardian
//! verdict and emits confidence predictions. The engine consumes only this
//! I/O contract — never the reasoning behind it.
//!
//! The contract requires [`CognitionAdapter::process_signal`] to be
//! deterministic for identical input and free of externally visible side
//! effects beyond its returned predictions, so the orchestrator can safely
//! re-invoke it on replay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::signal::{Intent, Signal, UserContext};

/// A proposed action awaiting authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftProposal {
    /// Stable draft identifier chosen by cognition. Repeated persistence
    /// under this id is a no-op.
    pub id: String,
    /// Action type (consulted by the autonomy policy).
    pub draft_type: String,
    /// Short human-readable title.
    pub title: String,
    /// JSON content of the proposed action.
    pub content: serde_json::Value,
    /// Cognition's confidence in this draft, 0.0–1.0.
    pub confidence: f64,
}

/// A confidence prediction emitted alongside the draft.
///
/// The engine assigns the stored event id deterministically from the
/// workflow instance; cognition only names the node and the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidencePrediction {
    /// Which cognition node produced the prediction.
    pub node: String,
    pub predicted_confidence: f64,
    pub context: serde_json::Value,
}

/// Everything cognition returns for one signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitionOutput {
    /// The predicted intent behind the signal.
    pub intent: Intent,
    /// The proposed action, if the intent warrants one.
    pub draft: Option<DraftProposal>,
    /// The guardian verdict, in whatever shape cognition produced it.
    /// Normalized later by [`crate::guardian::map_decision`].
    pub decision: serde_json::Value,
    /// Confidence predictions to record for calibration.
    pub predictions: Vec<ConfidencePrediction>,
    /// The session this run belongs to.
    pub session_id: String,
}

/// The external cognition collaborator.
#[async_trait]
pub trait CognitionAdapter: Send + Sync {
    /// Run the cognition step for one signal.
    async fn process_signal(
        &self,
        signal: &Signal,
        ctx: &UserContext,
    ) -> EngineResult<CognitionOutput>;
}
