//! Domain models for the receipt processor.

pub mod file_record;
pub mod receipt;

// Re-export commonly used types
pub use file_record::{
    ClaimMode, FileIdRequest, FileRecord, FileStatus, QueuedResponse, UploadResponse,
    ValidateResponse,
};
pub use receipt::{
    DEFAULT_CURRENCY, ExtractedReceipt, ProcessResponse, ReceiptData, UNKNOWN_MERCHANT,
    from_cents, to_cents,
};
