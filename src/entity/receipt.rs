//! Receipt entity for SeaORM.
//!
//! Structured data extracted from a receipt file. Amounts are stored in
//! minor units (cents).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "receipts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Originating receipt file. Never changes once set.
    #[sea_orm(unique)]
    pub file_record_id: Option<Uuid>,
    pub purchased_at: Date,
    pub merchant_name: String,
    pub total_amount_cents: i64,
    pub tax_amount_cents: i64,
    pub currency: String,
    /// Last known location of the source file.
    pub file_path: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::receipt_file::Entity",
        from = "Column::FileRecordId",
        to = "super::receipt_file::Column::Id",
        on_delete = "SetNull"
    )]
    ReceiptFile,
}

impl Related<super::receipt_file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReceiptFile.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
