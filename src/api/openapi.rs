//! OpenAPI documentation configuration.

use utoipa::OpenApi;

use crate::{api, error, models};

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Receipt Processor API",
        version = "0.1.0",
        description = "Upload scanned receipts, extract their structured data and archive them by purchase year"
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    paths(
        // Health endpoints
        api::health::root,
        api::health::health,
        api::health::ready,
        // Receipt endpoints
        api::receipts::upload_receipt,
        api::receipts::validate_receipt,
        api::receipts::process_receipt,
        api::receipts::list_receipts,
        api::receipts::get_receipt,
        api::receipts::get_file,
    ),
    components(
        schemas(
            // Common
            error::ErrorResponse,
            // Health
            api::health::HealthResponse,
            api::health::ReadyResponse,
            api::health::RootResponse,
            // Files
            models::FileStatus,
            models::FileRecord,
            models::FileIdRequest,
            models::UploadResponse,
            models::ValidateResponse,
            models::QueuedResponse,
            // Receipts
            models::ReceiptData,
            models::ExtractedReceipt,
            models::ProcessResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Receipts", description = "Receipt upload, validation, extraction and listing")
    )
)]
pub struct ApiDoc;
