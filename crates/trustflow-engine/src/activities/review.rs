//! The review-queue activity — parks a draft for human review.
//!
//! Sets the draft to `pending_review`, upserts the review request with the
//! guardian decision attached for audit, and pings the notification
//! side-channel for high/urgent priorities. Idempotent in effect: re-running
//! with the same draft id updates the pending state instead of duplicating
//! it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use trustflow_store::{DraftStatus, DraftStore, ReviewPriority, ReviewStore};

use crate::error::EngineResult;
use crate::guardian::GuardianDecision;

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// The notification side-channel.
///
/// The interface is fixed here; delivery (push, chat message, email) is an
/// external concern.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: &str,
        review_request_id: &str,
        priority: ReviewPriority,
    ) -> EngineResult<()>;
}

/// Discards notifications — the default when no channel is wired up.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        _user_id: &str,
        _review_request_id: &str,
        _priority: ReviewPriority,
    ) -> EngineResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

/// Inputs to one queue-for-review call.
#[derive(Debug, Clone)]
pub struct ReviewRequestInput {
    pub draft_id: String,
    pub user_id: String,
    pub session_id: String,
    pub decision: GuardianDecision,
    pub priority: ReviewPriority,
}

/// What queuing produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    pub queued: bool,
    pub review_request_id: String,
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Queues drafts for human review.
pub struct ReviewActivity {
    drafts: DraftStore,
    reviews: ReviewStore,
    notifier: Arc<dyn Notifier>,
}

impl ReviewActivity {
    pub fn new(drafts: DraftStore, reviews: ReviewStore, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            drafts,
            reviews,
            notifier,
        }
    }

    /// Park the draft and (for high/urgent priority) notify a human.
    #[instrument(skip(self, input), fields(draft_id = %input.draft_id, priority = %input.priority))]
    pub async fn run(&self, input: &ReviewRequestInput) -> EngineResult<ReviewReport> {
        self.drafts
            .set_status(&input.draft_id, DraftStatus::PendingReview, None)
            .await?;

        let review_request_id = self
            .reviews
            .upsert_pending(
                &input.user_id,
                &input.draft_id,
                &input.session_id,
                input.priority,
                &input.decision.to_json(),
            )
            .await?;

        info!(
            review_request_id = %review_request_id,
            draft_id = %input.draft_id,
            "draft queued for human review"
        );

        if input.priority >= ReviewPriority::High {
            self.notifier
                .notify(&input.user_id, &review_request_id, input.priority)
                .await?;
        }

        Ok(ReviewReport {
            queued: true,
            review_request_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
