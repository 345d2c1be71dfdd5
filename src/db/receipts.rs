//! Database operations for extracted receipts.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::entity::receipt::{self, ActiveModel, Entity as Receipt};
use crate::error::{AppError, AppResult};
use crate::models::{ExtractedReceipt, ReceiptData, to_cents};

use super::DbPool;
use super::repository::ReceiptRepository;

fn cents(amount: rust_decimal::Decimal, field: &str) -> AppResult<i64> {
    to_cents(amount).ok_or_else(|| AppError::InvalidInput(format!("{} out of range", field)))
}

#[async_trait]
impl ReceiptRepository for DbPool {
    async fn upsert_receipt(
        &self,
        file_record_id: Uuid,
        candidate_paths: &[String],
        file_path: &str,
        data: &ReceiptData,
    ) -> AppResult<ExtractedReceipt> {
        let total = cents(data.total_amount, "total_amount")?;
        let tax = cents(data.tax_amount, "tax_amount")?;
        let now = Utc::now();

        let mut lineage = Condition::any().add(receipt::Column::FileRecordId.eq(file_record_id));
        if !candidate_paths.is_empty() {
            lineage = lineage.add(receipt::Column::FilePath.is_in(candidate_paths.to_vec()));
        }

        let matches = Receipt::find()
            .filter(lineage)
            .order_by_asc(receipt::Column::CreatedAt)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to look up receipt: {}", e)))?;

        // Prefer the row carrying the explicit reference over a path-only match.
        let existing = match matches
            .iter()
            .position(|m| m.file_record_id == Some(file_record_id))
        {
            Some(index) => matches.into_iter().nth(index),
            None => matches
                .into_iter()
                .find(|m| m.file_record_id.is_none()),
        };

        let result = match existing {
            Some(model) => {
                let adopt = model.file_record_id.is_none();
                let mut active: ActiveModel = model.into();
                // Rows written before the reference existed are adopted here.
                if adopt {
                    active.file_record_id = Set(Some(file_record_id));
                }
                active.purchased_at = Set(data.purchased_at);
                active.merchant_name = Set(data.merchant_name.clone());
                active.total_amount_cents = Set(total);
                active.tax_amount_cents = Set(tax);
                active.currency = Set(data.currency.clone());
                active.file_path = Set(file_path.to_string());
                active.updated_at = Set(now);

                active
                    .update(self.connection())
                    .await
                    .map_err(|e| AppError::Database(format!("Failed to update receipt: {}", e)))?
            }
            None => {
                let model = ActiveModel {
                    id: Set(Uuid::now_v7()),
                    file_record_id: Set(Some(file_record_id)),
                    purchased_at: Set(data.purchased_at),
                    merchant_name: Set(data.merchant_name.clone()),
                    total_amount_cents: Set(total),
                    tax_amount_cents: Set(tax),
                    currency: Set(data.currency.clone()),
                    file_path: Set(file_path.to_string()),
                    created_at: Set(now),
                    updated_at: Set(now),
                };

                model
                    .insert(self.connection())
                    .await
                    .map_err(|e| AppError::Database(format!("Failed to insert receipt: {}", e)))?
            }
        };

        Ok(result.into())
    }

    async fn list_receipts(&self) -> AppResult<Vec<ExtractedReceipt>> {
        let results = Receipt::find()
            .order_by_desc(receipt::Column::CreatedAt)
            .order_by_desc(receipt::Column::Id)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list receipts: {}", e)))?;

        Ok(results.into_iter().map(Into::into).collect())
    }

    async fn find_receipt(&self, id: Uuid) -> AppResult<Option<ExtractedReceipt>> {
        let result = Receipt::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get receipt: {}", e)))?;

        Ok(result.map(Into::into))
    }
}
