//! SeaORM entity definitions.

pub mod receipt;
pub mod receipt_file;
