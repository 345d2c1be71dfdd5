//! Extraction, archival and receipt persistence.

use std::time::Duration;

use receipt_processor_lib::models::{ClaimMode, FileStatus};
use receipt_processor_lib::services::{ExtractionOutcome, ExtractorError, FailureKind, ProcessError};
use rust_decimal::Decimal;

use super::mock_extractor::ScriptedExtractor;
use super::test_helpers::*;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[actix_rt::test]
async fn test_process_extracts_and_archives_by_year() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;

    let outcome = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();

    let archived = pipeline.upload_dir.join("2023").join("a.pdf");
    let ExtractionOutcome::Completed {
        record_id,
        file_path,
        data,
        receipt,
    } = outcome
    else {
        panic!("expected completion, got {:?}", outcome);
    };

    assert_eq!(record_id, id);
    assert_eq!(file_path, archived.to_string_lossy());
    assert_eq!(data.merchant_name, "Acme");
    assert_eq!(data.purchased_at.to_string(), "2023-11-05");
    assert_eq!(data.total_amount, dec("42.50"));
    assert_eq!(data.tax_amount, dec("3.50"));
    assert_eq!(data.currency, "USD");
    assert_eq!(receipt.file_record_id, Some(id));
    assert_eq!(receipt.file_path, file_path);

    assert!(archived.exists());
    assert!(!pipeline.upload_dir.join("a.pdf").exists());

    let record = pipeline.record(id).await;
    assert_eq!(record.status, FileStatus::Completed);
    assert!(record.is_processed);
    assert_eq!(record.file_path, file_path);
    assert!(record.last_error.is_none());

    let receipts = pipeline.receipts.list_receipts().await.unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].total_amount.to_string(), "42.50");
    assert_eq!(receipts[0].tax_amount.to_string(), "3.50");
}

#[actix_rt::test]
async fn test_reprocess_updates_the_same_receipt() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;

    let ExtractionOutcome::Completed { receipt: first, .. } = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap()
    else {
        panic!("first attempt should complete");
    };

    pipeline.extractor.push(Ok(
        r#"{"merchant_name": "Acme Corp", "purchased_at": "2023-11-05", "total_amount": "50.00", "tax_amount": "4.00", "currency": "usd"}"#
            .to_string(),
    ));
    let ExtractionOutcome::Completed { receipt: second, .. } = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap()
    else {
        panic!("reprocess should complete");
    };

    assert_eq!(first.id, second.id);
    assert_eq!(second.merchant_name, "Acme Corp");
    assert_eq!(second.total_amount, dec("50.00"));
    assert_eq!(second.currency, "USD");
    assert_eq!(pipeline.receipts.list_receipts().await.unwrap().len(), 1);
}

#[actix_rt::test]
async fn test_reupload_after_archival_keeps_one_receipt() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;
    pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();

    // Same name again: the record points back at the upload directory
    let again = pipeline.upload_valid("a.pdf").await;
    assert_eq!(again, id);
    assert_eq!(
        pipeline.record(id).await.file_path,
        pipeline.upload_dir.join("a.pdf").to_string_lossy()
    );

    let outcome = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();
    assert_eq!(outcome.status(), FileStatus::Completed);

    assert!(pipeline.upload_dir.join("2023").join("a.pdf").exists());
    assert!(!pipeline.upload_dir.join("a.pdf").exists());
    assert_eq!(pipeline.receipts.list_receipts().await.unwrap().len(), 1);
}

#[actix_rt::test]
async fn test_missing_record_is_not_found() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;

    let err = pipeline
        .orchestrator
        .process(uuid::Uuid::now_v7(), ClaimMode::Request)
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessError::NotFound(_)));
    assert_eq!(pipeline.extractor.calls(), 0);
}

#[actix_rt::test]
async fn test_concurrent_requests_claim_once() {
    let extractor = ScriptedExtractor::acme().with_delay(Duration::from_millis(100));
    let pipeline = TestPipeline::new(extractor).await;
    let id = pipeline.upload_valid("a.pdf").await;

    let (first, second) = tokio::join!(
        pipeline.orchestrator.process(id, ClaimMode::Request),
        pipeline.orchestrator.process(id, ClaimMode::Request),
    );

    let results = [first, second];
    let completed = results
        .iter()
        .filter(|r| matches!(r, Ok(ExtractionOutcome::Completed { .. })))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ProcessError::AlreadyProcessing(_))))
        .count();

    assert_eq!(completed, 1);
    assert_eq!(rejected, 1);
    assert_eq!(pipeline.extractor.calls(), 1);
    assert_eq!(pipeline.receipts.list_receipts().await.unwrap().len(), 1);
}

#[actix_rt::test]
async fn test_claim_is_exclusive() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;
    let from = ClaimMode::Request.claimable_from();

    let (a, b) = tokio::join!(
        pipeline.files.claim_file(id, from),
        pipeline.files.claim_file(id, from),
    );

    assert_ne!(a.unwrap(), b.unwrap());
    assert_eq!(pipeline.record(id).await.status, FileStatus::Processing);
}

#[actix_rt::test]
async fn test_request_rate_limit_queues_without_spending_a_retry() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme().with_rate_limits(1)).await;
    let id = pipeline.upload_valid("a.pdf").await;

    let outcome = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();

    let ExtractionOutcome::Queued {
        retry_count,
        next_attempt_at,
        ..
    } = outcome
    else {
        panic!("expected queued, got {:?}", outcome);
    };
    assert_eq!(retry_count, 0);
    assert!(next_attempt_at.is_none());

    let record = pipeline.record(id).await;
    assert_eq!(record.status, FileStatus::Queued);
    assert_eq!(record.retry_count, 0);
    assert!(record.last_error.unwrap().contains("Rate limited"));
    assert!(pipeline.upload_dir.join("a.pdf").exists());
    assert!(pipeline.receipts.list_receipts().await.unwrap().is_empty());
}

#[actix_rt::test]
async fn test_other_failure_is_terminal() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    pipeline.extractor.push(Err(ExtractorError::Upstream {
        status: 500,
        message: "internal".to_string(),
    }));
    let id = pipeline.upload_valid("a.pdf").await;

    let outcome = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();

    let ExtractionOutcome::Failed { kind, error, .. } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(kind, FailureKind::Other);
    assert!(error.contains("500"));

    let record = pipeline.record(id).await;
    assert_eq!(record.status, FileStatus::Failed);
    assert_eq!(record.retry_count, 0);
    assert!(!record.is_processed);
    assert_eq!(record.last_error.as_deref(), Some(error.as_str()));
}

#[actix_rt::test]
async fn test_answer_without_json_fails() {
    let pipeline = TestPipeline::new(ScriptedExtractor::new("I could not read this receipt.")).await;
    let id = pipeline.upload_valid("a.pdf").await;

    let outcome = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();

    assert_eq!(outcome.status(), FileStatus::Failed);
    assert!(pipeline.upload_dir.join("a.pdf").exists());
}

#[actix_rt::test]
async fn test_missing_source_file_fails() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;
    std::fs::remove_file(pipeline.upload_dir.join("a.pdf")).unwrap();

    let outcome = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();

    assert_eq!(outcome.status(), FileStatus::Failed);
    assert_eq!(pipeline.extractor.calls(), 0);
    assert!(pipeline.record(id).await.last_error.unwrap().contains("missing"));
}

#[actix_rt::test]
async fn test_failed_record_can_be_retried_by_request() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    pipeline
        .extractor
        .push(Err(ExtractorError::Transport("connection reset".to_string())));
    let id = pipeline.upload_valid("a.pdf").await;

    let first = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();
    assert_eq!(first.status(), FileStatus::Failed);

    let second = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();
    assert_eq!(second.status(), FileStatus::Completed);

    let record = pipeline.record(id).await;
    assert!(record.last_error.is_none());
    assert!(record.is_processed);
}

#[actix_rt::test]
async fn test_receipts_listed_newest_first() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;

    let mut ids = Vec::new();
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        let id = pipeline.upload_valid(name).await;
        let ExtractionOutcome::Completed { receipt, .. } = pipeline
            .orchestrator
            .process(id, ClaimMode::Request)
            .await
            .unwrap()
        else {
            panic!("{} should complete", name);
        };
        ids.push(receipt.id);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let listed: Vec<_> = pipeline
        .receipts
        .list_receipts()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    ids.reverse();
    assert_eq!(listed, ids);

    let found = pipeline.receipts.find_receipt(ids[0]).await.unwrap();
    assert!(found.is_some());
    assert!(
        pipeline
            .receipts
            .find_receipt(uuid::Uuid::now_v7())
            .await
            .unwrap()
            .is_none()
    );
}

#[actix_rt::test]
async fn test_unstorable_amount_is_an_extraction_failure() {
    let pipeline = TestPipeline::new(ScriptedExtractor::new(
        r#"{"merchant_name": "Acme", "purchased_at": "2023-11-05", "total_amount": 100000000000000000}"#,
    ))
    .await;
    let id = pipeline.upload_valid("a.pdf").await;

    let outcome = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();

    let ExtractionOutcome::Failed { kind, error, .. } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(kind, FailureKind::Other);
    assert!(error.contains("total_amount"));
    assert_eq!(pipeline.record(id).await.status, FileStatus::Failed);
    assert!(pipeline.receipts.list_receipts().await.unwrap().is_empty());
}
