//! Integration tests exercising the repositories together on one database,
//! the way the engine uses them during a workflow run.

use serde_json::json;
use trustflow_store::{
    AuthorizationStore, Database, DraftStatus, DraftStore, ExecutionLog, NewDraft, NewExecution,
    OutcomeStore, OutcomeType, ReviewPriority, ReviewStatus, ReviewStore, StoreError,
};

async fn setup_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    db
}

fn draft(id: &str) -> NewDraft {
    NewDraft {
        id: id.into(),
        user_id: "u1".into(),
        draft_type: "send_email".into(),
        title: "Reply".into(),
        content: json!({"to": "a@example.com"}),
        confidence: 0.9,
        session_id: "s1".into(),
    }
}

#[tokio::test]
async fn executed_draft_leaves_full_audit_trail() {
    let db = setup_db().await;
    let drafts = DraftStore::new(db.clone());
    let log = ExecutionLog::new(db.clone());
    let outcomes = OutcomeStore::new(db.clone());

    drafts.upsert(draft("d1")).await.unwrap();

    let prediction = outcomes
        .record_prediction("u1", "draft_confidence", 0.9, json!({"draft_id": "d1"}))
        .await
        .unwrap();

    let entry = log
        .record_success(NewExecution {
            idempotency_key: "wf-1:d1".into(),
            user_id: "u1".into(),
            draft_id: "d1".into(),
            action_type: "send_email".into(),
            autonomy_level: 3,
        })
        .await
        .unwrap();
    drafts
        .set_status("d1", DraftStatus::AutoExecuted, Some(entry.executed_at))
        .await
        .unwrap();

    let outcome = outcomes
        .insert("u1", Some("d1"), OutcomeType::Success, "executed")
        .await
        .unwrap();
    let value = outcome.outcome_type.calibration_value().unwrap();
    outcomes
        .close_predictions(&[prediction.id.clone()], value)
        .await
        .unwrap();

    // The full trail: executed draft, one success row, closed prediction.
    let stored = drafts.get("d1").await.unwrap().unwrap();
    assert_eq!(stored.status, DraftStatus::AutoExecuted);
    assert_eq!(stored.executed_at, Some(entry.executed_at));
    assert_eq!(log.count_success("wf-1:d1").await.unwrap(), 1);
    let closed = outcomes.get_event(&prediction.id).await.unwrap().unwrap();
    assert_eq!(closed.actual_outcome, Some(1.0));
}

#[tokio::test]
async fn queued_draft_parks_in_review_with_decision_attached() {
    let db = setup_db().await;
    let drafts = DraftStore::new(db.clone());
    let reviews = ReviewStore::new(db.clone());

    drafts.upsert(draft("d1")).await.unwrap();
    drafts
        .set_status("d1", DraftStatus::PendingReview, None)
        .await
        .unwrap();

    let decision = json!({
        "allowed": true,
        "required_action": "queue_review",
        "explanation": "outbound email needs a look",
        "constraint_hits": [{"name": "recipient_unknown", "severity": "soft", "blocked": false}]
    });
    let review_id = reviews
        .upsert_pending("u1", "d1", "s1", ReviewPriority::High, &decision)
        .await
        .unwrap();

    let request = reviews.get(&review_id).await.unwrap().unwrap();
    assert_eq!(request.status, ReviewStatus::Pending);
    assert_eq!(request.guardian_decision, decision);

    // The human approves; the transition is accepted exactly once.
    reviews
        .set_status(&review_id, ReviewStatus::Approved)
        .await
        .unwrap();
    assert!(matches!(
        reviews
            .set_status(&review_id, ReviewStatus::Rejected)
            .await
            .unwrap_err(),
        StoreError::InvalidTransition { .. }
    ));
}

#[tokio::test]
async fn ledger_uniqueness_survives_concurrent_writers() {
    let db = setup_db().await;
    let log = ExecutionLog::new(db);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let log = log.clone();
        handles.push(tokio::spawn(async move {
            log.record_success(NewExecution {
                idempotency_key: "contested".into(),
                user_id: "u1".into(),
                draft_id: "d1".into(),
                action_type: "schedule_event".into(),
                autonomy_level: 2,
            })
            .await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            wins += 1;
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(log.count_success("contested").await.unwrap(), 1);
}

#[tokio::test]
async fn authorization_gates_are_per_user_and_action() {
    let db = setup_db().await;
    let auth = AuthorizationStore::new(db);

    auth.grant("u1", "send_email").await.unwrap();
    auth.grant("u2", "transfer_funds").await.unwrap();

    assert!(auth.is_authorized("u1", "send_email").await.unwrap());
    assert!(!auth.is_authorized("u1", "transfer_funds").await.unwrap());
    assert!(auth.is_authorized("u2", "transfer_funds").await.unwrap());

    auth.revoke("u1", "send_email").await.unwrap();
    assert!(!auth.is_authorized("u1", "send_email").await.unwrap());
}

#[tokio::test]
async fn on_disk_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trustflow.db");

    {
        let db = Database::open_and_migrate(path.clone()).await.unwrap();
        let drafts = DraftStore::new(db);
        drafts.upsert(draft("d1")).await.unwrap();
    }

    let db = Database::open_and_migrate(path).await.unwrap();
    let drafts = DraftStore::new(db);
    let stored = drafts.get("d1").await.unwrap().unwrap();
    assert_eq!(stored.draft_type, "send_email");
}
