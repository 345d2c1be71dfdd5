//! Create receipts table.

use sea_orm_migration::prelude::*;

use super::m20260203_000001_create_receipt_files::ReceiptFile;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Receipt::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Receipt::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Receipt::FileRecordId).uuid())
                    .col(ColumnDef::new(Receipt::PurchasedAt).date().not_null())
                    .col(
                        ColumnDef::new(Receipt::MerchantName)
                            .string_len(500)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Receipt::TotalAmountCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Receipt::TaxAmountCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Receipt::Currency)
                            .string_len(10)
                            .not_null()
                            .default("USD"),
                    )
                    .col(ColumnDef::new(Receipt::FilePath).string_len(1000).not_null())
                    .col(
                        ColumnDef::new(Receipt::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Receipt::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Receipt::Table, Receipt::FileRecordId)
                            .to(ReceiptFile::Table, ReceiptFile::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_receipts_file_record_id")
                    .table(Receipt::Table)
                    .col(Receipt::FileRecordId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_receipts_file_path")
                    .table(Receipt::Table)
                    .col(Receipt::FilePath)
                    .to_owned(),
            )
            .await?;

        // Listing is newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_receipts_created_at")
                    .table(Receipt::Table)
                    .col(Receipt::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Receipt::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Receipt {
    #[sea_orm(iden = "receipts")]
    Table,
    Id,
    FileRecordId,
    PurchasedAt,
    MerchantName,
    TotalAmountCents,
    TaxAmountCents,
    Currency,
    FilePath,
    CreatedAt,
    UpdatedAt,
}
