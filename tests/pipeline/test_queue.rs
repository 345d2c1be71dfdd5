//! Retry queue worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use receipt_processor_lib::db::file_records::INTERRUPTED_ERROR;
use receipt_processor_lib::models::{ClaimMode, FileStatus};
use receipt_processor_lib::services::{QueueWorker, TickReport, WorkerSettings};

use super::mock_extractor::ScriptedExtractor;
use super::test_helpers::*;

#[actix_rt::test]
async fn test_worker_picks_up_pending_uploads() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;

    let report = pipeline.worker().run_once().await;

    assert_eq!(report.selected, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(pipeline.record(id).await.status, FileStatus::Completed);
    assert!(pipeline.upload_dir.join("2023").join("a.pdf").exists());
}

#[actix_rt::test]
async fn test_worker_ignores_invalid_and_finished_records() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let done = pipeline.upload_valid("done.pdf").await;
    pipeline
        .orchestrator
        .process(done, ClaimMode::Request)
        .await
        .unwrap();

    let invalid = pipeline.ingest.ingest("photo.png", b"\x89PNG").await.unwrap();
    pipeline.ingest.validate(invalid.id).await.unwrap();

    let report = pipeline.worker().run_once().await;

    assert_eq!(report, TickReport::default());
    assert_eq!(pipeline.extractor.calls(), 1);
}

#[actix_rt::test]
async fn test_rate_limits_stop_at_retry_ceiling() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme().with_rate_limits(5)).await;
    let id = pipeline.upload_valid("a.pdf").await;
    let worker = pipeline.worker();

    for expected in 1..=4 {
        let report = worker.run_once().await;
        assert_eq!(report.requeued, 1, "tick {}", expected);

        let record = pipeline.record(id).await;
        assert_eq!(record.status, FileStatus::Queued);
        assert_eq!(record.retry_count, expected);
        assert!(record.next_attempt_at.is_none());
    }

    let report = worker.run_once().await;
    assert_eq!(report.failed, 1);

    let record = pipeline.record(id).await;
    assert_eq!(record.status, FileStatus::Failed);
    assert_eq!(record.retry_count, 5);
    assert!(record.last_error.unwrap().contains("Rate limited"));

    // Terminal: never selected again
    let report = worker.run_once().await;
    assert_eq!(report.selected, 0);
    assert_eq!(pipeline.extractor.calls(), 5);
}

#[actix_rt::test]
async fn test_success_after_rate_limits_keeps_retry_count() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme().with_rate_limits(3)).await;
    let id = pipeline.upload_valid("a.pdf").await;
    let worker = pipeline.worker();

    for _ in 0..3 {
        assert_eq!(worker.run_once().await.requeued, 1);
    }
    assert_eq!(worker.run_once().await.completed, 1);

    let record = pipeline.record(id).await;
    assert_eq!(record.status, FileStatus::Completed);
    assert_eq!(record.retry_count, 3);
    assert!(record.is_processed);
    assert!(record.last_error.is_none());
    assert_eq!(pipeline.receipts.list_receipts().await.unwrap().len(), 1);
}

#[actix_rt::test]
async fn test_request_rate_limit_is_finished_by_worker() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme().with_rate_limits(1)).await;
    let id = pipeline.upload_valid("a.pdf").await;

    let outcome = pipeline
        .orchestrator
        .process(id, ClaimMode::Request)
        .await
        .unwrap();
    assert_eq!(outcome.status(), FileStatus::Queued);

    let report = pipeline.worker().run_once().await;
    assert_eq!(report.completed, 1);

    let record = pipeline.record(id).await;
    assert_eq!(record.status, FileStatus::Completed);
    assert_eq!(record.retry_count, 0);
}

#[actix_rt::test]
async fn test_backoff_defers_next_attempt() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme().with_rate_limits(1)).await;
    let id = pipeline.upload_valid("a.pdf").await;

    let orchestrator = Arc::new(
        receipt_processor_lib::services::ExtractionOrchestrator::new(
            pipeline.files.clone(),
            pipeline.receipts.clone(),
            pipeline.extractor.clone(),
            receipt_processor_lib::services::RetryPolicy {
                max_retries: 5,
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(600),
            },
            Duration::from_secs(5),
        ),
    );
    let worker = QueueWorker::new(
        pipeline.files.clone(),
        orchestrator,
        WorkerSettings::default(),
    );

    let before = Utc::now();
    assert_eq!(worker.run_once().await.requeued, 1);

    let record = pipeline.record(id).await;
    assert_eq!(record.retry_count, 1);
    let next = record.next_attempt_at.expect("backoff should schedule a retry");
    assert!(next >= before + chrono::Duration::seconds(60));

    // Not due yet
    assert_eq!(worker.run_once().await.selected, 0);
}

#[actix_rt::test]
async fn test_batch_is_limited() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    for i in 0..7 {
        pipeline.upload_valid(&format!("r{}.pdf", i)).await;
    }
    let worker = pipeline.worker();

    let first = worker.run_once().await;
    assert_eq!(first.selected, 5);
    assert_eq!(first.completed, 5);

    let second = worker.run_once().await;
    assert_eq!(second.selected, 2);
    assert_eq!(second.completed, 2);
}

#[actix_rt::test]
async fn test_stalled_processing_is_requeued() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;
    assert!(
        pipeline
            .files
            .claim_file(id, ClaimMode::Request.claimable_from())
            .await
            .unwrap()
    );

    // Fresh claims are left alone
    let recovered = pipeline
        .files
        .requeue_stalled(Utc::now() - chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(recovered, 0);
    assert_eq!(pipeline.record(id).await.status, FileStatus::Processing);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let recovered = pipeline.files.requeue_stalled(Utc::now()).await.unwrap();
    assert_eq!(recovered, 1);

    let record = pipeline.record(id).await;
    assert_eq!(record.status, FileStatus::Queued);
    assert_eq!(record.last_error.as_deref(), Some(INTERRUPTED_ERROR));
    assert_eq!(record.retry_count, 0);
}

#[actix_rt::test]
async fn test_worker_recovers_stalled_records_in_tick() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;
    pipeline
        .files
        .claim_file(id, ClaimMode::Request.claimable_from())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let worker = QueueWorker::new(
        pipeline.files.clone(),
        pipeline.orchestrator.clone(),
        WorkerSettings {
            stale_processing_after: Duration::ZERO,
            ..WorkerSettings::default()
        },
    );
    let report = worker.run_once().await;

    assert_eq!(report.recovered, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(pipeline.record(id).await.status, FileStatus::Completed);
}

#[actix_rt::test]
async fn test_started_worker_stops_cleanly() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;

    let worker = Arc::new(QueueWorker::new(
        pipeline.files.clone(),
        pipeline.orchestrator.clone(),
        WorkerSettings {
            interval: Duration::from_millis(20),
            ..WorkerSettings::default()
        },
    ));
    let handle = worker.start();

    let mut status = FileStatus::Pending;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = pipeline.record(id).await.status;
        if status == FileStatus::Completed {
            break;
        }
    }
    handle.stop().await;

    assert_eq!(status, FileStatus::Completed);
}

#[actix_rt::test]
async fn test_unstorable_amount_fails_once_instead_of_looping() {
    let pipeline = TestPipeline::new(ScriptedExtractor::new(
        r#"{"merchant_name": "Acme", "purchased_at": "2023-11-05", "total_amount": 100000000000000000}"#,
    ))
    .await;
    let id = pipeline.upload_valid("a.pdf").await;
    let worker = pipeline.worker();

    let report = worker.run_once().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors, 0);

    let record = pipeline.record(id).await;
    assert_eq!(record.status, FileStatus::Failed);
    assert_eq!(record.retry_count, 0);
    assert!(record.last_error.unwrap().contains("total_amount"));

    for _ in 0..3 {
        assert_eq!(worker.run_once().await.selected, 0);
    }
    assert_eq!(pipeline.extractor.calls(), 1);
    assert!(pipeline.upload_dir.join("a.pdf").exists());
}

#[actix_rt::test]
async fn test_startup_recovery_requeues_every_processing_record() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;
    pipeline
        .files
        .claim_file(id, ClaimMode::Request.claimable_from())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let recovered = pipeline.worker().recover_on_startup().await.unwrap();

    assert_eq!(recovered, 1);
    let record = pipeline.record(id).await;
    assert_eq!(record.status, FileStatus::Queued);
    assert_eq!(record.last_error.as_deref(), Some(INTERRUPTED_ERROR));
}

#[actix_rt::test]
async fn test_started_worker_leaves_fresh_claims_alone() {
    let pipeline = TestPipeline::new(ScriptedExtractor::acme()).await;
    let id = pipeline.upload_valid("a.pdf").await;

    // A request holds the claim while the worker starts
    pipeline
        .files
        .claim_file(id, ClaimMode::Request.claimable_from())
        .await
        .unwrap();

    let worker = Arc::new(QueueWorker::new(
        pipeline.files.clone(),
        pipeline.orchestrator.clone(),
        WorkerSettings {
            interval: Duration::from_millis(20),
            ..WorkerSettings::default()
        },
    ));
    let handle = worker.start();
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop().await;

    assert_eq!(pipeline.record(id).await.status, FileStatus::Processing);
    assert_eq!(pipeline.extractor.calls(), 0);
}
