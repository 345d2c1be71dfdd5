//! Ingestion and validation.

use std::time::Duration;

use receipt_processor_lib::models::{ClaimMode, FileStatus};
use receipt_processor_lib::services::ProcessError;

use super::mock_extractor::ScriptedExtractor;
use super::test_helpers::*;

#[actix_rt::test]
async fn test_first_upload_creates_pending_record() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;

    let result = pipeline.ingest.ingest("a.pdf", PDF_BYTES).await.unwrap();
    assert!(result.created);

    let record = pipeline.record(result.id).await;
    assert_eq!(record.file_name, "a.pdf");
    assert_eq!(record.status, FileStatus::Pending);
    assert!(record.is_valid);
    assert!(!record.is_processed);
    assert_eq!(record.retry_count, 0);
    assert!(record.last_error.is_none());

    let stored = pipeline.upload_dir.join("a.pdf");
    assert_eq!(record.file_path, stored.to_string_lossy());
    assert_eq!(std::fs::read(&stored).unwrap(), PDF_BYTES);
}

#[actix_rt::test]
async fn test_same_name_reuses_record() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;

    let first = pipeline.ingest.ingest("a.pdf", PDF_BYTES).await.unwrap();
    let before = pipeline.record(first.id).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = pipeline
        .ingest
        .ingest("a.pdf", b"%PDF-1.4\n% second scan\n")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert!(!second.created);

    let after = pipeline.record(second.id).await;
    assert!(after.updated_at > before.updated_at);
    assert_eq!(
        std::fs::read(pipeline.upload_dir.join("a.pdf")).unwrap(),
        b"%PDF-1.4\n% second scan\n"
    );

    // No stray temporary files are left behind
    let entries: Vec<_> = std::fs::read_dir(&pipeline.upload_dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["a.pdf".to_string()]);
}

#[actix_rt::test]
async fn test_different_names_create_distinct_records() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;

    let a = pipeline.ingest.ingest("a.pdf", PDF_BYTES).await.unwrap();
    let b = pipeline.ingest.ingest("b.pdf", PDF_BYTES).await.unwrap();

    assert!(a.created && b.created);
    assert_ne!(a.id, b.id);
}

#[actix_rt::test]
async fn test_path_traversal_name_is_reduced_to_base_name() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;

    let result = pipeline
        .ingest
        .ingest("../../escape.pdf", PDF_BYTES)
        .await
        .unwrap();

    let record = pipeline.record(result.id).await;
    assert_eq!(record.file_name, "escape.pdf");
    assert!(pipeline.upload_dir.join("escape.pdf").exists());
}

#[actix_rt::test]
async fn test_validate_accepts_pdf() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;

    let result = pipeline.ingest.ingest("scan.PDF", PDF_BYTES).await.unwrap();
    let record = pipeline.ingest.validate(result.id).await.unwrap();

    assert!(record.is_valid);
    assert!(record.invalid_reason.is_none());
}

#[actix_rt::test]
async fn test_validate_rejects_other_types_and_blocks_processing() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;

    let result = pipeline.ingest.ingest("photo.png", b"\x89PNG").await.unwrap();
    let record = pipeline.ingest.validate(result.id).await.unwrap();

    assert!(!record.is_valid);
    assert_eq!(record.invalid_reason.as_deref(), Some("Not a valid PDF file"));

    let err = pipeline
        .orchestrator
        .process(result.id, ClaimMode::Request)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Invalid { .. }));
    assert_eq!(pipeline.extractor.calls(), 0);
    assert_eq!(pipeline.record(result.id).await.status, FileStatus::Pending);
}

#[actix_rt::test]
async fn test_validate_unknown_id_is_not_found() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;

    let err = pipeline
        .ingest
        .validate(uuid::Uuid::now_v7())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        receipt_processor_lib::error::AppError::NotFound(_)
    ));
}
