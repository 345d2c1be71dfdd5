//! Database operations for receipt files.
//!
//! Status transitions into and out of `processing` are single conditional
//! UPDATE statements; the affected-row count tells the caller whether it won.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set,
};
use uuid::Uuid;

use crate::entity::receipt_file::{self, ActiveModel, Entity as ReceiptFile};
use crate::error::{AppError, AppResult};
use crate::models::{FileRecord, FileStatus};

use super::DbPool;
use super::repository::{AttemptResult, FileRecordRepository, NewFileRecord};

/// Error recorded on records recovered from an interrupted attempt.
pub const INTERRUPTED_ERROR: &str = "Processing was interrupted before it finished";

fn to_record(model: receipt_file::Model) -> AppResult<FileRecord> {
    FileRecord::try_from(model).map_err(AppError::Database)
}

impl DbPool {
    async fn get_file_model(&self, id: Uuid) -> AppResult<receipt_file::Model> {
        ReceiptFile::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get receipt file: {}", e)))?
            .ok_or_else(|| AppError::NotFound(format!("Receipt file {}", id)))
    }
}

#[async_trait]
impl FileRecordRepository for DbPool {
    async fn find_file(&self, id: Uuid) -> AppResult<Option<FileRecord>> {
        let result = ReceiptFile::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get receipt file: {}", e)))?;

        result.map(to_record).transpose()
    }

    async fn find_file_by_name(&self, file_name: &str) -> AppResult<Option<FileRecord>> {
        let result = ReceiptFile::find()
            .filter(receipt_file::Column::FileName.eq(file_name))
            .one(self.connection())
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to look up receipt file by name: {}", e))
            })?;

        result.map(to_record).transpose()
    }

    async fn insert_file(&self, new_file: NewFileRecord) -> AppResult<FileRecord> {
        let now = Utc::now();

        let model = ActiveModel {
            id: Set(Uuid::now_v7()),
            file_name: Set(new_file.file_name),
            file_path: Set(new_file.file_path),
            is_valid: Set(true),
            invalid_reason: Set(None),
            is_processed: Set(false),
            status: Set(FileStatus::Pending.as_str().to_string()),
            retry_count: Set(0),
            last_error: Set(None),
            next_attempt_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = model
            .insert(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert receipt file: {}", e)))?;

        to_record(result)
    }

    async fn replace_file_path(&self, id: Uuid, file_path: &str) -> AppResult<FileRecord> {
        let file = self.get_file_model(id).await?;

        let mut active: ActiveModel = file.into();
        active.file_path = Set(file_path.to_string());
        active.updated_at = Set(Utc::now());

        let result = active
            .update(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to update file path: {}", e)))?;

        to_record(result)
    }

    async fn set_validity(
        &self,
        id: Uuid,
        is_valid: bool,
        invalid_reason: Option<String>,
    ) -> AppResult<FileRecord> {
        let file = self.get_file_model(id).await?;

        let mut active: ActiveModel = file.into();
        active.is_valid = Set(is_valid);
        active.invalid_reason = Set(if is_valid { None } else { invalid_reason });
        active.updated_at = Set(Utc::now());

        let result = active
            .update(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to update validity: {}", e)))?;

        to_record(result)
    }

    async fn claim_file(&self, id: Uuid, from: &[FileStatus]) -> AppResult<bool> {
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();

        let result = ReceiptFile::update_many()
            .col_expr(
                receipt_file::Column::Status,
                Expr::value(FileStatus::Processing.as_str()),
            )
            .col_expr(receipt_file::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(receipt_file::Column::Id.eq(id))
            .filter(receipt_file::Column::Status.is_in(from))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to claim receipt file: {}", e)))?;

        Ok(result.rows_affected == 1)
    }

    async fn finish_attempt(&self, id: Uuid, result: AttemptResult) -> AppResult<bool> {
        let status = result.status();
        let mut update = ReceiptFile::update_many()
            .col_expr(receipt_file::Column::Status, Expr::value(status.as_str()))
            .col_expr(receipt_file::Column::UpdatedAt, Expr::value(Utc::now()));

        update = match result {
            AttemptResult::Completed { file_path } => update
                .col_expr(receipt_file::Column::FilePath, Expr::value(file_path))
                .col_expr(receipt_file::Column::IsProcessed, Expr::value(true))
                .col_expr(
                    receipt_file::Column::LastError,
                    Expr::value(Option::<String>::None),
                )
                .col_expr(
                    receipt_file::Column::NextAttemptAt,
                    Expr::value(Option::<DateTime<Utc>>::None),
                ),
            AttemptResult::Queued {
                retry_count,
                next_attempt_at,
                error,
            } => update
                .col_expr(receipt_file::Column::RetryCount, Expr::value(retry_count))
                .col_expr(
                    receipt_file::Column::NextAttemptAt,
                    Expr::value(next_attempt_at),
                )
                .col_expr(receipt_file::Column::LastError, Expr::value(Some(error))),
            AttemptResult::Failed { retry_count, error } => update
                .col_expr(receipt_file::Column::RetryCount, Expr::value(retry_count))
                .col_expr(
                    receipt_file::Column::NextAttemptAt,
                    Expr::value(Option::<DateTime<Utc>>::None),
                )
                .col_expr(receipt_file::Column::LastError, Expr::value(Some(error))),
        };

        let outcome = update
            .filter(receipt_file::Column::Id.eq(id))
            .filter(receipt_file::Column::Status.eq(FileStatus::Processing.as_str()))
            .exec(self.connection())
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to record attempt as {}: {}", status, e))
            })?;

        Ok(outcome.rows_affected == 1)
    }

    async fn find_retry_candidates(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<FileRecord>> {
        let queued_and_due = Condition::all()
            .add(receipt_file::Column::Status.eq(FileStatus::Queued.as_str()))
            .add(
                Condition::any()
                    .add(receipt_file::Column::NextAttemptAt.is_null())
                    .add(receipt_file::Column::NextAttemptAt.lte(now)),
            );

        let stuck_pending = Condition::all()
            .add(receipt_file::Column::Status.eq(FileStatus::Pending.as_str()))
            .add(receipt_file::Column::IsValid.eq(true))
            .add(receipt_file::Column::IsProcessed.eq(false));

        let result = ReceiptFile::find()
            .filter(Condition::any().add(queued_and_due).add(stuck_pending))
            .order_by_asc(receipt_file::Column::UpdatedAt)
            .order_by_asc(receipt_file::Column::Id)
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to select retry batch: {}", e)))?;

        result.into_iter().map(to_record).collect()
    }

    async fn requeue_stalled(&self, updated_before: DateTime<Utc>) -> AppResult<u64> {
        let result = ReceiptFile::update_many()
            .col_expr(
                receipt_file::Column::Status,
                Expr::value(FileStatus::Queued.as_str()),
            )
            .col_expr(
                receipt_file::Column::LastError,
                Expr::value(Some(INTERRUPTED_ERROR.to_string())),
            )
            .col_expr(receipt_file::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(receipt_file::Column::Status.eq(FileStatus::Processing.as_str()))
            .filter(receipt_file::Column::UpdatedAt.lt(updated_before))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to requeue stalled files: {}", e)))?;

        Ok(result.rows_affected)
    }
}
