//! Receipt pipeline API handlers.

use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures_util::StreamExt;
use tracing::info;
use uuid::Uuid;

use crate::db::{FileRecordRepository, ReceiptRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    ClaimMode, FileIdRequest, FileStatus, ProcessResponse, QueuedResponse, UploadResponse,
    ValidateResponse,
};
use crate::services::ingest::{self, IngestService};
use crate::services::{ExtractionOrchestrator, ExtractionOutcome};

/// Multipart field carrying the receipt document.
pub const UPLOAD_FIELD: &str = "receipt";

/// Upload limits shared with the handlers.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_upload_size: usize,
}

/// Upload a receipt document.
///
/// Accepts a multipart form with the PDF in the `receipt` field. A file with the
/// same name as an earlier upload replaces that upload's content.
#[utoipa::path(
    post,
    path = "/api/upload",
    tag = "Receipts",
    request_body(content = String, content_type = "multipart/form-data", description = "Form with a `receipt` file field"),
    responses(
        (status = 201, description = "File uploaded", body = UploadResponse),
        (status = 200, description = "Existing file replaced", body = UploadResponse),
        (status = 400, description = "No file, wrong type or too large", body = crate::error::ErrorResponse),
    )
)]
pub async fn upload_receipt(
    ingest: web::Data<IngestService>,
    limits: web::Data<UploadLimits>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::InvalidInput(format!("Multipart error: {}", e)))?;

        if field.name() != Some(UPLOAD_FIELD) {
            // Drain unrelated fields so the stream can advance
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| AppError::InvalidInput(format!("Read error: {}", e)))?;
            }
            continue;
        }

        let raw_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .ok_or_else(|| AppError::InvalidInput("No file uploaded".to_string()))?
            .to_string();

        let file_name = ingest::sanitize_file_name(&raw_name)
            .ok_or_else(|| AppError::InvalidInput("Invalid file name".to_string()))?;

        if !ingest::has_expected_extension(&file_name) {
            return Err(AppError::InvalidInput(
                "Only PDF files are allowed".to_string(),
            ));
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::InvalidInput(format!("Read error: {}", e)))?;
            if data.len() + chunk.len() > limits.max_upload_size {
                return Err(AppError::InvalidInput(format!(
                    "File exceeds maximum size of {} bytes",
                    limits.max_upload_size
                )));
            }
            data.extend_from_slice(&chunk);
        }

        if data.is_empty() {
            return Err(AppError::InvalidInput("Uploaded file is empty".to_string()));
        }

        let result = ingest.ingest(&file_name, &data).await?;
        info!(
            file_id = %result.id,
            "Receipt uploaded: name={}, size={}, created={}",
            file_name,
            data.len(),
            result.created
        );

        return Ok(if result.created {
            HttpResponse::Created().json(UploadResponse {
                id: result.id,
                message: "File uploaded successfully".to_string(),
            })
        } else {
            HttpResponse::Ok().json(UploadResponse {
                id: result.id,
                message: "File updated successfully".to_string(),
            })
        });
    }

    Err(AppError::InvalidInput("No file uploaded".to_string()))
}

/// Validate an uploaded receipt file.
#[utoipa::path(
    post,
    path = "/api/validate",
    tag = "Receipts",
    request_body = FileIdRequest,
    responses(
        (status = 200, description = "Validation result", body = ValidateResponse),
        (status = 404, description = "File not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn validate_receipt(
    ingest: web::Data<IngestService>,
    body: web::Json<FileIdRequest>,
) -> AppResult<HttpResponse> {
    let id = body.into_inner().id;
    let record = ingest.validate(id).await?;

    Ok(HttpResponse::Ok().json(ValidateResponse {
        id,
        is_valid: record.is_valid,
    }))
}

/// Extract structured data from a receipt file and archive it by purchase year.
///
/// A rate limit from the extraction service queues the file for the background
/// worker and answers 429.
#[utoipa::path(
    post,
    path = "/api/process",
    tag = "Receipts",
    request_body = FileIdRequest,
    responses(
        (status = 200, description = "Receipt processed", body = ProcessResponse),
        (status = 400, description = "File missing or invalid", body = crate::error::ErrorResponse),
        (status = 409, description = "File is already being processed", body = crate::error::ErrorResponse),
        (status = 429, description = "Rate limited, queued for retry", body = QueuedResponse),
        (status = 500, description = "Processing failed", body = crate::error::ErrorResponse),
    )
)]
pub async fn process_receipt(
    orchestrator: web::Data<ExtractionOrchestrator>,
    body: web::Json<FileIdRequest>,
) -> AppResult<HttpResponse> {
    let id = body.into_inner().id;

    match orchestrator.process(id, ClaimMode::Request).await? {
        ExtractionOutcome::Completed { data, .. } => Ok(HttpResponse::Ok().json(ProcessResponse {
            message: "Receipt processed successfully and organized by year".to_string(),
            data,
        })),
        ExtractionOutcome::Queued { record_id, .. } => {
            Ok(HttpResponse::TooManyRequests().json(QueuedResponse {
                message: "Rate limit hit. Receipt has been queued for background processing."
                    .to_string(),
                id: record_id,
                status: FileStatus::Queued,
            }))
        }
        ExtractionOutcome::Failed { error, .. } => Err(AppError::Processing(error)),
    }
}

/// List extracted receipts, newest first.
#[utoipa::path(
    get,
    path = "/api/receipts",
    tag = "Receipts",
    responses(
        (status = 200, description = "Extracted receipts", body = Vec<crate::models::ExtractedReceipt>),
    )
)]
pub async fn list_receipts(receipts: web::Data<dyn ReceiptRepository>) -> AppResult<HttpResponse> {
    let receipts = receipts.list_receipts().await?;
    Ok(HttpResponse::Ok().json(receipts))
}

/// Get a single extracted receipt.
#[utoipa::path(
    get,
    path = "/api/receipts/{id}",
    tag = "Receipts",
    params(
        ("id" = Uuid, Path, description = "Receipt UUID")
    ),
    responses(
        (status = 200, description = "Extracted receipt", body = crate::models::ExtractedReceipt),
        (status = 404, description = "Receipt not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn get_receipt(
    receipts: web::Data<dyn ReceiptRepository>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let receipt = receipts
        .find_receipt(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Receipt {}", id)))?;

    Ok(HttpResponse::Ok().json(receipt))
}

/// Get the pipeline state of an uploaded file.
///
/// Lets clients follow a file that was queued after a rate limit.
#[utoipa::path(
    get,
    path = "/api/files/{id}",
    tag = "Receipts",
    params(
        ("id" = Uuid, Path, description = "File UUID")
    ),
    responses(
        (status = 200, description = "File record", body = crate::models::FileRecord),
        (status = 404, description = "File not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn get_file(
    files: web::Data<dyn FileRecordRepository>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let record = files
        .find_file(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File {}", id)))?;

    Ok(HttpResponse::Ok().json(record))
}

/// Configure receipt routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/upload").route(web::post().to(upload_receipt)))
        .service(web::resource("/validate").route(web::post().to(validate_receipt)))
        .service(web::resource("/process").route(web::post().to(process_receipt)))
        .service(web::resource("/receipts").route(web::get().to(list_receipts)))
        .service(web::resource("/receipts/{id}").route(web::get().to(get_receipt)))
        .service(web::resource("/files/{id}").route(web::get().to(get_file)));
}
