//! ReceiptFile entity for SeaORM.
//!
//! One row per uploaded source document. `status` holds one of the
//! `FileStatus` values.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "receipt_files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Original upload name, unique (dedup key).
    #[sea_orm(unique)]
    pub file_name: String,
    /// Current on-disk location; rewritten by archival.
    pub file_path: String,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub is_processed: bool,
    pub status: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Earliest time the retry worker may pick the record up again.
    pub next_attempt_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::receipt::Entity")]
    Receipt,
}

impl Related<super::receipt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Receipt.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
