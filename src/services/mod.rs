//! Receipt pipeline services.

pub mod archiver;
pub mod extractor;
pub mod gemini;
pub mod ingest;
pub mod orchestrator;
pub mod queue_worker;
pub mod receipt_parser;

pub use extractor::{ExtractorError, ReceiptExtractor};
pub use gemini::GeminiExtractor;
pub use ingest::{IngestResult, IngestService};
pub use orchestrator::{
    ExtractionOrchestrator, ExtractionOutcome, FailureKind, ProcessError, RetryPolicy,
};
pub use queue_worker::{QueueWorker, QueueWorkerHandle, TickReport, WorkerSettings};
