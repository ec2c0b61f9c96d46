//! # trustflow-store
//!
//! Persistence layer for the Trust Workflow Engine.
//!
//! Provides SQLite-backed repositories — one per entity — so the engine's
//! uniqueness and idempotency invariants are enforced at a single boundary
//! instead of being every caller's responsibility:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  DraftStore        (upsert-only drafts)      │
//! │  ExecutionLog      (idempotency ledger)      │
//! │  OutcomeStore      (outcomes + calibration)  │
//! │  ReviewStore       (human review queue)      │
//! │  AuthorizationStore (irreversible grants)    │
//! ├──────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, spawn_blocking)     │
//! │  Migrations (versioned, transactional)       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The execution log's partial unique index is the engine's sole
//! concurrency-control primitive for "did this already happen".

pub mod auth_store;
pub mod db;
pub mod draft_store;
pub mod error;
pub mod execution_log;
pub mod migration;
pub mod outcome_store;
pub mod review_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use auth_store::AuthorizationStore;
pub use db::Database;
pub use draft_store::{DraftStatus, DraftStore, NewDraft, StoredDraft};
pub use error::{StoreError, StoreResult};
pub use execution_log::{ExecutionLog, ExecutionLogEntry, NewExecution};
pub use outcome_store::{ConfidenceEvent, Outcome, OutcomeStore, OutcomeType};
pub use review_store::{ReviewPriority, ReviewRequest, ReviewStatus, ReviewStore};
