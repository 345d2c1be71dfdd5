//! Create receipt_files table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReceiptFile::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReceiptFile::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReceiptFile::FileName)
                            .string_len(500)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReceiptFile::FilePath)
                            .string_len(1000)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReceiptFile::IsValid)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ReceiptFile::InvalidReason).string_len(500))
                    .col(
                        ColumnDef::new(ReceiptFile::IsProcessed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ReceiptFile::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ReceiptFile::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ReceiptFile::LastError).text())
                    .col(ColumnDef::new(ReceiptFile::NextAttemptAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(ReceiptFile::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ReceiptFile::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One record per original file name (re-uploads replace content)
        manager
            .create_index(
                Index::create()
                    .name("idx_receipt_files_file_name")
                    .table(ReceiptFile::Table)
                    .col(ReceiptFile::FileName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Retry worker scans by status
        manager
            .create_index(
                Index::create()
                    .name("idx_receipt_files_status")
                    .table(ReceiptFile::Table)
                    .col(ReceiptFile::Status)
                    .col(ReceiptFile::NextAttemptAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReceiptFile::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ReceiptFile {
    #[sea_orm(iden = "receipt_files")]
    Table,
    Id,
    FileName,
    FilePath,
    IsValid,
    InvalidReason,
    IsProcessed,
    Status,
    RetryCount,
    LastError,
    NextAttemptAt,
    CreatedAt,
    UpdatedAt,
}
