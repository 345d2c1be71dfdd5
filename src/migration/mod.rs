//! SeaORM database migrations.

pub use sea_orm_migration::prelude::*;

mod m20260203_000001_create_receipt_files;
mod m20260203_000002_create_receipts;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260203_000001_create_receipt_files::Migration),
            Box::new(m20260203_000002_create_receipts::Migration),
        ]
    }
}
