//! Repository interfaces injected into the pipeline components.
//!
//! `DbPool` implements both traits; components hold `Arc<dyn …>` so they never
//! reach for a process-wide handle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ExtractedReceipt, FileRecord, FileStatus, ReceiptData};

/// Fields of a freshly uploaded receipt file.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub file_name: String,
    pub file_path: String,
}

/// How an extraction attempt ended, applied to a record still in `processing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// Extraction succeeded and the file now lives at `file_path`.
    Completed { file_path: String },
    /// Retriable failure; the worker may try again from `next_attempt_at`.
    Queued {
        retry_count: i32,
        next_attempt_at: Option<DateTime<Utc>>,
        error: String,
    },
    /// Terminal failure.
    Failed { retry_count: i32, error: String },
}

impl AttemptResult {
    /// Status the record ends up in.
    pub fn status(&self) -> FileStatus {
        match self {
            Self::Completed { .. } => FileStatus::Completed,
            Self::Queued { .. } => FileStatus::Queued,
            Self::Failed { .. } => FileStatus::Failed,
        }
    }
}

/// Persistence for receipt files.
#[async_trait]
pub trait FileRecordRepository: Send + Sync {
    /// Load a record by id.
    async fn find_file(&self, id: Uuid) -> AppResult<Option<FileRecord>>;

    /// Load a record by its original upload name.
    async fn find_file_by_name(&self, file_name: &str) -> AppResult<Option<FileRecord>>;

    /// Insert a new `pending`, valid, unprocessed record.
    async fn insert_file(&self, new_file: NewFileRecord) -> AppResult<FileRecord>;

    /// Point an existing record at freshly uploaded content.
    async fn replace_file_path(&self, id: Uuid, file_path: &str) -> AppResult<FileRecord>;

    /// Persist the outcome of validation.
    async fn set_validity(
        &self,
        id: Uuid,
        is_valid: bool,
        invalid_reason: Option<String>,
    ) -> AppResult<FileRecord>;

    /// Atomically move a record into `processing` if its status is one of `from`.
    ///
    /// Returns `false` when another attempt got there first.
    async fn claim_file(&self, id: Uuid, from: &[FileStatus]) -> AppResult<bool>;

    /// Apply the result of an attempt to a record that is still `processing`.
    ///
    /// Returns `false` if the record left `processing` in the meantime.
    async fn finish_attempt(&self, id: Uuid, result: AttemptResult) -> AppResult<bool>;

    /// Records the retry worker should attempt: `queued` and due, or `pending`,
    /// valid and never processed. Oldest first.
    async fn find_retry_candidates(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<FileRecord>>;

    /// Move records stuck in `processing` since before `updated_before` back to `queued`.
    async fn requeue_stalled(&self, updated_before: DateTime<Utc>) -> AppResult<u64>;
}

/// Persistence for extracted receipts.
#[async_trait]
pub trait ReceiptRepository: Send + Sync {
    /// Insert or overwrite the receipt of `file_record_id`.
    ///
    /// An existing row matches on the file reference or on any of
    /// `candidate_paths` (the pre- and post-archival locations).
    async fn upsert_receipt(
        &self,
        file_record_id: Uuid,
        candidate_paths: &[String],
        file_path: &str,
        data: &ReceiptData,
    ) -> AppResult<ExtractedReceipt>;

    /// All receipts, newest first.
    async fn list_receipts(&self) -> AppResult<Vec<ExtractedReceipt>>;

    /// A single receipt.
    async fn find_receipt(&self, id: Uuid) -> AppResult<Option<ExtractedReceipt>>;
}
