//! `Store` trait — single async interface for all durable pipeline state:
//! application records, the skip set, classifier usage, and run summaries.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::pipeline::types::ApplicationType;
use crate::stage::Stage;

/// The persisted unit of tracking: one application per distinct
/// `(company_key, role_key)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationRecord {
    /// Stable id (UUID string).
    pub id: String,
    /// Canonical company key, derived once and never recomputed.
    pub company_key: String,
    /// Canonical role key.
    pub role_key: String,
    /// First-seen human-readable company form.
    pub display_company: String,
    /// First-seen human-readable role form.
    pub display_role: String,
    pub stage: Stage,
    pub application_type: ApplicationType,
    pub date_first_applied: DateTime<Utc>,
    /// Invariant: `last_updated >= date_first_applied`, only ever bumped
    /// forward.
    pub last_updated: DateTime<Utc>,
    /// Accumulated free-text notes.
    pub notes: String,
    /// Contributing RawEvent ids in merge order (idempotence/audit).
    pub event_ids: Vec<String>,
}

/// Durable decision for a message that was not merged into a record.
#[derive(Debug, Clone)]
pub struct SkipEntry {
    pub message_id: String,
    /// Stable reason code (`SkipReason::code()`).
    pub reason: String,
    /// Human-auditable detail (matched phrase, confidence value, ...).
    pub detail: Option<String>,
    /// True: never re-examine. False: re-attempt next run.
    pub permanent: bool,
    pub created_at: DateTime<Utc>,
}

/// One row of the append-only run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub scanned: u64,
    pub new_records: u64,
    pub updated_records: u64,
    pub skipped: u64,
    /// Reason code → count.
    pub skip_reasons: BTreeMap<String, u64>,
}

/// Backend-agnostic durable state. The pipeline is the sole writer
/// between runs; records are never deleted here.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Application records ─────────────────────────────────────────

    /// Insert a freshly created record, including its first event id.
    async fn insert_application(&self, record: &ApplicationRecord) -> Result<(), DatabaseError>;

    /// Update a record's stage, notes, and `last_updated`.
    async fn update_application(
        &self,
        id: &str,
        stage: Stage,
        notes: &str,
        last_updated: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// All records, most recently updated first, with event ids attached.
    async fn all_applications(&self) -> Result<Vec<ApplicationRecord>, DatabaseError>;

    async fn get_application(&self, id: &str) -> Result<Option<ApplicationRecord>, DatabaseError>;

    /// Append a contributing event id to a record. Appending an id that
    /// is already attached (to any record) is a no-op.
    async fn append_event(
        &self,
        application_id: &str,
        message_id: &str,
        received_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Message ids already folded into some record.
    async fn merged_event_ids(&self) -> Result<HashSet<String>, DatabaseError>;

    // ── Skip set ────────────────────────────────────────────────────

    /// Record (or overwrite) the skip decision for a message.
    async fn record_skip(&self, entry: &SkipEntry) -> Result<(), DatabaseError>;

    /// Message ids that must never be re-examined.
    async fn permanent_skip_ids(&self) -> Result<HashSet<String>, DatabaseError>;

    /// Message ids recorded as retry-eligible on a previous run.
    async fn retry_skip_ids(&self) -> Result<HashSet<String>, DatabaseError>;

    // ── Classifier usage ────────────────────────────────────────────

    /// Calls made against the classification service today (UTC).
    async fn classifier_calls_today(&self) -> Result<u32, DatabaseError>;

    /// Bump today's call count, returning the new total.
    async fn increment_classifier_calls(&self) -> Result<u32, DatabaseError>;

    // ── Run log ─────────────────────────────────────────────────────

    async fn append_run(&self, summary: &RunSummary) -> Result<(), DatabaseError>;

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>, DatabaseError>;
}
