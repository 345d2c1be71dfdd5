//! Extraction orchestrator: claim, extract, archive, upsert, settle.
//!
//! Both the `/process` endpoint and the retry queue worker go through
//! [`ExtractionOrchestrator::process`]. Once a record has been claimed every
//! failure is written back as `queued` or `failed` with `last_error` set; only
//! store failures surface as errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::db::{AttemptResult, FileRecordRepository, ReceiptRepository};
use crate::error::AppError;
use crate::models::{ClaimMode, ExtractedReceipt, FileRecord, FileStatus, ReceiptData};

use super::archiver;
use super::extractor::{ExtractorError, PDF_MIME_TYPE, ReceiptExtractor};
use super::receipt_parser;

/// Errors that prevent an attempt from being recorded at all.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("File {0} not found")]
    NotFound(Uuid),

    #[error("File {id} is not valid: {reason}")]
    Invalid { id: Uuid, reason: String },

    #[error("File {0} is already being processed")]
    AlreadyProcessing(Uuid),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound(_) | ProcessError::Invalid { .. } => {
                AppError::InvalidInput("Valid file not found".to_string())
            }
            ProcessError::AlreadyProcessing(id) => {
                AppError::Conflict(format!("File {} is already being processed", id))
            }
            ProcessError::Store(e) => e,
        }
    }
}

/// How an extraction attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The extraction service was over capacity.
    RateLimit,
    /// Anything else: configuration, timeout, malformed payload, file system.
    Other,
}

/// Result of a recorded attempt.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Completed {
        record_id: Uuid,
        file_path: String,
        data: ReceiptData,
        receipt: ExtractedReceipt,
    },
    Queued {
        record_id: Uuid,
        retry_count: i32,
        next_attempt_at: Option<DateTime<Utc>>,
        error: String,
    },
    Failed {
        record_id: Uuid,
        retry_count: i32,
        kind: FailureKind,
        error: String,
    },
}

impl ExtractionOutcome {
    /// Status the record was left in.
    pub fn status(&self) -> FileStatus {
        match self {
            Self::Completed { .. } => FileStatus::Completed,
            Self::Queued { .. } => FileStatus::Queued,
            Self::Failed { .. } => FileStatus::Failed,
        }
    }
}

/// Retry ceiling and per-record backoff applied to rate limits seen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.retry_base_delay,
            max_delay: settings.retry_max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: i32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).clamp(0, 31) as u32;
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decision after a rate limit on a record that had `retry_count` retries.
    pub fn after_rate_limit(&self, retry_count: i32, now: DateTime<Utc>) -> RetryDecision {
        let attempt = retry_count.saturating_add(1);
        if attempt >= self.max_retries {
            return RetryDecision::Fail {
                retry_count: self.max_retries,
            };
        }

        let delay = self.delay_for(attempt);
        let next_attempt_at = if delay.is_zero() {
            None
        } else {
            chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
        };

        RetryDecision::Requeue {
            retry_count: attempt,
            next_attempt_at,
        }
    }
}

/// What to do with a record after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeue {
        retry_count: i32,
        next_attempt_at: Option<DateTime<Utc>>,
    },
    Fail {
        retry_count: i32,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}

/// A failed attempt before it is written back.
struct AttemptFailure {
    kind: FailureKind,
    message: String,
}

impl AttemptFailure {
    fn other(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Other,
            message: message.into(),
        }
    }
}

impl From<ExtractorError> for AttemptFailure {
    fn from(err: ExtractorError) -> Self {
        let kind = if err.is_rate_limit() {
            FailureKind::RateLimit
        } else {
            FailureKind::Other
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Successful attempt before it is written back.
struct AttemptSuccess {
    file_path: String,
    data: ReceiptData,
    receipt: ExtractedReceipt,
}

/// Why a claimed attempt ended early.
enum AttemptError {
    Failure(AttemptFailure),
    Store(AppError),
}

impl From<AttemptFailure> for AttemptError {
    fn from(failure: AttemptFailure) -> Self {
        Self::Failure(failure)
    }
}

/// Drives a single receipt file through extraction.
pub struct ExtractionOrchestrator {
    files: Arc<dyn FileRecordRepository>,
    receipts: Arc<dyn ReceiptRepository>,
    extractor: Arc<dyn ReceiptExtractor>,
    policy: RetryPolicy,
    extraction_timeout: Duration,
}

impl ExtractionOrchestrator {
    pub fn new(
        files: Arc<dyn FileRecordRepository>,
        receipts: Arc<dyn ReceiptRepository>,
        extractor: Arc<dyn ReceiptExtractor>,
        policy: RetryPolicy,
        extraction_timeout: Duration,
    ) -> Self {
        Self {
            files,
            receipts,
            extractor,
            policy,
            extraction_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one extraction attempt for `id`.
    ///
    /// `mode` decides which statuses may be claimed and whether a rate limit
    /// counts against the retry ceiling (only worker attempts do).
    pub async fn process(
        &self,
        id: Uuid,
        mode: ClaimMode,
    ) -> Result<ExtractionOutcome, ProcessError> {
        let record = self
            .files
            .find_file(id)
            .await?
            .ok_or(ProcessError::NotFound(id))?;

        if !record.is_valid {
            return Err(ProcessError::Invalid {
                id,
                reason: record
                    .invalid_reason
                    .clone()
                    .unwrap_or_else(|| "marked invalid".to_string()),
            });
        }

        if !self.files.claim_file(id, mode.claimable_from()).await? {
            return Err(ProcessError::AlreadyProcessing(id));
        }
        // Another attempt may have settled between the read and the claim.
        let record = self.files.find_file(id).await?.unwrap_or(record);

        info!(
            file_id = %id,
            retry_count = record.retry_count,
            extractor = self.extractor.name(),
            "Processing receipt {}",
            record.file_name
        );

        match self.attempt(&record).await {
            Ok(success) => self.settle_success(&record, success).await,
            Err(AttemptError::Failure(failure)) => {
                self.settle_failure(&record, mode, failure).await
            }
            Err(AttemptError::Store(e)) => {
                self.release_after_store_error(&record, &e).await;
                Err(ProcessError::Store(e))
            }
        }
    }

    async fn attempt(&self, record: &FileRecord) -> Result<AttemptSuccess, AttemptError> {
        let stored_path = PathBuf::from(&record.file_path);
        let source = archiver::resolve_source(&stored_path).await.ok_or_else(|| {
            AttemptFailure::other(format!("Source file {} is missing", record.file_path))
        })?;

        let document = tokio::fs::read(&source).await.map_err(|e| {
            AttemptFailure::other(format!("Failed to read {}: {}", source.display(), e))
        })?;

        let text = tokio::time::timeout(
            self.extraction_timeout,
            self.extractor.extract(&document, PDF_MIME_TYPE),
        )
        .await
        .map_err(|_| AttemptFailure::from(ExtractorError::Timeout(self.extraction_timeout)))?
        .map_err(AttemptFailure::from)?;

        let data = receipt_parser::parse_receipt(&text, Utc::now().date_naive())
            .map_err(|e| AttemptFailure::other(e.to_string()))?;

        let archived = archiver::archive(&source, data.purchased_at)
            .await
            .map_err(|e| AttemptFailure::other(e.to_string()))?;
        let file_path = path_string(&archived);

        let candidates = candidate_paths(&record.file_path, &source, &file_path);
        let receipt = self
            .receipts
            .upsert_receipt(record.id, &candidates, &file_path, &data)
            .await
            .map_err(AttemptError::Store)?;

        Ok(AttemptSuccess {
            file_path,
            data,
            receipt,
        })
    }

    async fn settle_success(
        &self,
        record: &FileRecord,
        success: AttemptSuccess,
    ) -> Result<ExtractionOutcome, ProcessError> {
        let recorded = self
            .files
            .finish_attempt(
                record.id,
                AttemptResult::Completed {
                    file_path: success.file_path.clone(),
                },
            )
            .await?;

        if !recorded {
            warn!(
                file_id = %record.id,
                "Record left processing before completion could be recorded"
            );
        }

        info!(
            file_id = %record.id,
            status = "completed",
            retry_count = record.retry_count,
            "Receipt from {} archived at {}",
            success.data.merchant_name,
            success.file_path
        );

        Ok(ExtractionOutcome::Completed {
            record_id: record.id,
            file_path: success.file_path,
            data: success.data,
            receipt: success.receipt,
        })
    }

    async fn settle_failure(
        &self,
        record: &FileRecord,
        mode: ClaimMode,
        failure: AttemptFailure,
    ) -> Result<ExtractionOutcome, ProcessError> {
        let decision = match (failure.kind, mode) {
            (FailureKind::RateLimit, ClaimMode::Worker) => {
                self.policy.after_rate_limit(record.retry_count, Utc::now())
            }
            // Request-path rate limits hand the record to the worker without
            // spending a retry.
            (FailureKind::RateLimit, ClaimMode::Request) => RetryDecision::Requeue {
                retry_count: record.retry_count,
                next_attempt_at: None,
            },
            (FailureKind::Other, _) => RetryDecision::Fail {
                retry_count: record.retry_count,
            },
        };

        let error = failure.message;
        let (result, outcome) = match decision {
            RetryDecision::Requeue {
                retry_count,
                next_attempt_at,
            } => (
                AttemptResult::Queued {
                    retry_count,
                    next_attempt_at,
                    error: error.clone(),
                },
                ExtractionOutcome::Queued {
                    record_id: record.id,
                    retry_count,
                    next_attempt_at,
                    error: error.clone(),
                },
            ),
            RetryDecision::Fail { retry_count } => (
                AttemptResult::Failed {
                    retry_count,
                    error: error.clone(),
                },
                ExtractionOutcome::Failed {
                    record_id: record.id,
                    retry_count,
                    kind: failure.kind,
                    error: error.clone(),
                },
            ),
        };

        let status = result.status();
        let recorded = self.files.finish_attempt(record.id, result).await?;
        if !recorded {
            warn!(
                file_id = %record.id,
                "Record left processing before the failure could be recorded"
            );
        }

        match &outcome {
            ExtractionOutcome::Queued { retry_count, .. } => warn!(
                file_id = %record.id,
                status = %status,
                retry_count,
                "Rate limited, queued for retry: {}",
                error
            ),
            _ => error!(
                file_id = %record.id,
                status = %status,
                "Processing failed: {}",
                error
            ),
        }

        Ok(outcome)
    }

    /// Hand a claimed record back to the worker after the store failed mid-attempt.
    async fn release_after_store_error(&self, record: &FileRecord, cause: &AppError) {
        let release = AttemptResult::Queued {
            retry_count: record.retry_count,
            next_attempt_at: None,
            error: cause.to_string(),
        };
        if let Err(e) = self.files.finish_attempt(record.id, release).await {
            // Stale-processing recovery picks the record up later.
            error!(file_id = %record.id, "Failed to release claimed record: {}", e);
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Every path the receipt of this record may have been stored under.
fn candidate_paths(stored: &str, source: &Path, archived: &str) -> Vec<String> {
    let mut paths = vec![stored.to_string()];
    for path in [path_string(source), archived.to_string()] {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}
