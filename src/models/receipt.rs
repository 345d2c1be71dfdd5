//! Extracted receipt domain models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::receipt;

/// Currency used when the extraction result names none.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Merchant used when the extraction result names none.
pub const UNKNOWN_MERCHANT: &str = "Unknown Merchant";

/// Normalized output of one extraction call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReceiptData {
    pub merchant_name: String,
    pub purchased_at: NaiveDate,
    pub total_amount: Decimal,
    pub tax_amount: Decimal,
    pub currency: String,
}

/// A stored extraction result.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExtractedReceipt {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_record_id: Option<Uuid>,
    pub purchased_at: NaiveDate,
    pub merchant_name: String,
    pub total_amount: Decimal,
    pub tax_amount: Decimal,
    pub currency: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<receipt::Model> for ExtractedReceipt {
    fn from(model: receipt::Model) -> Self {
        Self {
            id: model.id,
            file_record_id: model.file_record_id,
            purchased_at: model.purchased_at,
            merchant_name: model.merchant_name,
            total_amount: from_cents(model.total_amount_cents),
            tax_amount: from_cents(model.tax_amount_cents),
            currency: model.currency,
            file_path: model.file_path,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Response after a successful extraction.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProcessResponse {
    pub message: String,
    pub data: ReceiptData,
}

/// Convert a 2-dp amount into stored minor units.
pub fn to_cents(amount: Decimal) -> Option<i64> {
    amount
        .round_dp(2)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
}

/// Convert stored minor units into a 2-dp amount.
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
