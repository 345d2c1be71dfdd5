//! Ingestion and validation of uploaded receipt files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{FileRecordRepository, NewFileRecord};
use crate::error::{AppError, AppResult};
use crate::models::FileRecord;

/// Extension accepted by the upload filter and by validation.
pub const EXPECTED_EXTENSION: &str = "pdf";

/// Reason recorded when validation rejects a file.
pub const INVALID_PDF_REASON: &str = "Not a valid PDF file";

/// Result of storing an upload.
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub id: Uuid,
    /// False when an existing record with the same name was updated.
    pub created: bool,
}

/// Whether `path` carries the expected document extension (case-insensitive).
pub fn has_expected_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(EXPECTED_EXTENSION))
}

/// Reduce a client-supplied file name to a safe base name.
///
/// Returns `None` for empty names, dot entries and names with control characters.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();

    if base.is_empty() || base == "." || base == ".." || base.chars().any(char::is_control) {
        return None;
    }
    Some(base.to_string())
}

/// Stores uploads and keeps their file records in sync.
#[derive(Clone)]
pub struct IngestService {
    files: Arc<dyn FileRecordRepository>,
    upload_dir: PathBuf,
}

impl IngestService {
    pub fn new(files: Arc<dyn FileRecordRepository>, upload_dir: PathBuf) -> Self {
        Self { files, upload_dir }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Persist `bytes` under `file_name` and create or update its record.
    ///
    /// A second upload with the same name replaces the content of the existing
    /// record instead of creating a new one.
    pub async fn ingest(&self, file_name: &str, bytes: &[u8]) -> AppResult<IngestResult> {
        let file_name = sanitize_file_name(file_name)
            .ok_or_else(|| AppError::InvalidInput("Invalid file name".to_string()))?;

        let file_path = self.store(&file_name, bytes).await?;
        let file_path = file_path.to_string_lossy().into_owned();

        if let Some(existing) = self.files.find_file_by_name(&file_name).await? {
            self.files.replace_file_path(existing.id, &file_path).await?;
            info!(file_id = %existing.id, "Replaced content of {}", file_name);
            return Ok(IngestResult {
                id: existing.id,
                created: false,
            });
        }

        let new_file = NewFileRecord {
            file_name: file_name.clone(),
            file_path: file_path.clone(),
        };

        match self.files.insert_file(new_file).await {
            Ok(record) => {
                info!(file_id = %record.id, "Stored new receipt file {}", file_name);
                Ok(IngestResult {
                    id: record.id,
                    created: true,
                })
            }
            Err(insert_err) => {
                // A concurrent upload of the same name may have won the unique index.
                let Some(existing) = self.files.find_file_by_name(&file_name).await? else {
                    return Err(insert_err);
                };
                self.files.replace_file_path(existing.id, &file_path).await?;
                Ok(IngestResult {
                    id: existing.id,
                    created: false,
                })
            }
        }
    }

    /// Re-check a record's file and persist the verdict.
    pub async fn validate(&self, id: Uuid) -> AppResult<FileRecord> {
        let record = self
            .files
            .find_file(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {}", id)))?;

        let is_valid = has_expected_extension(&record.file_path);
        if !is_valid {
            warn!(file_id = %id, "Validation rejected {}", record.file_path);
        }

        self.files
            .set_validity(id, is_valid, (!is_valid).then(|| INVALID_PDF_REASON.to_string()))
            .await
    }

    /// Write to a temporary name first so a half-written upload never replaces
    /// the previous content.
    async fn store(&self, file_name: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;

        let target = self.upload_dir.join(file_name);
        let partial = self
            .upload_dir
            .join(format!(".{}.{}.part", file_name, Uuid::new_v4()));

        tokio::fs::write(&partial, bytes).await?;
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        Ok(target)
    }
}
