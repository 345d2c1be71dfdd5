//! Receipt file domain models and DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::receipt_file;

/// Pipeline status of an uploaded receipt file.
///
/// ```text
/// pending/queued --claim--> processing
/// processing --success--> completed
/// processing --rate limit, retries left--> queued
/// processing --rate limit, retries exhausted / other error--> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Uploaded, not yet attempted.
    Pending,
    /// Claimed by exactly one extraction attempt.
    Processing,
    /// Extraction succeeded and the file was archived.
    Completed,
    /// Terminal failure.
    Failed,
    /// Waiting for the retry worker after a rate limit.
    Queued,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Queued => "queued",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "queued" => Some(Self::Queued),
            _ => None,
        }
    }

    /// Terminal for the automatic pipeline; only a manual request revisits these.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completed | Self::Failed => true,
            Self::Pending | Self::Processing | Self::Queued => false,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who is asking to claim a record for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// Explicit `POST /process`: any status except `processing`.
    Request,
    /// Retry worker: only `pending` and `queued`.
    Worker,
}

impl ClaimMode {
    /// Statuses a record may be claimed from.
    pub fn claimable_from(&self) -> &'static [FileStatus] {
        match self {
            Self::Request => &[
                FileStatus::Pending,
                FileStatus::Queued,
                FileStatus::Completed,
                FileStatus::Failed,
            ],
            Self::Worker => &[FileStatus::Pending, FileStatus::Queued],
        }
    }
}

/// An uploaded source document and its pipeline state.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FileRecord {
    pub id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    pub is_processed: bool,
    pub status: FileStatus,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<receipt_file::Model> for FileRecord {
    type Error = String;

    fn try_from(model: receipt_file::Model) -> Result<Self, Self::Error> {
        let status = FileStatus::parse(&model.status)
            .ok_or_else(|| format!("unknown status '{}' on file {}", model.status, model.id))?;

        Ok(Self {
            id: model.id,
            file_name: model.file_name,
            file_path: model.file_path,
            is_valid: model.is_valid,
            invalid_reason: model.invalid_reason,
            is_processed: model.is_processed,
            status,
            retry_count: model.retry_count,
            last_error: model.last_error,
            next_attempt_at: model.next_attempt_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Request body carrying a receipt file id.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct FileIdRequest {
    pub id: Uuid,
}

/// Response after uploading a receipt file.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UploadResponse {
    pub id: Uuid,
    pub message: String,
}

/// Response after validating a receipt file.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValidateResponse {
    pub id: Uuid,
    pub is_valid: bool,
}

/// Response when a receipt was queued after a rate limit.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueuedResponse {
    pub message: String,
    pub id: Uuid,
    pub status: FileStatus,
}
