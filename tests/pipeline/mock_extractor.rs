//! Scripted extractor standing in for the external extraction service.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use receipt_processor_lib::services::{ExtractorError, ReceiptExtractor};

/// Answer for the Acme receipt used across the suite.
pub const ACME_ANSWER: &str = "```json\n{\"merchant_name\": \"Acme\", \"purchased_at\": \"2023-11-05\", \"total_amount\": 42.50, \"tax_amount\": 3.50, \"currency\": \"USD\"}\n```";

/// Replays queued answers in order; once the script runs out every call
/// returns the fallback answer.
pub struct ScriptedExtractor {
    script: Mutex<VecDeque<Result<String, ExtractorError>>>,
    fallback: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(fallback: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers with the Acme receipt.
    pub fn acme() -> Self {
        Self::new(ACME_ANSWER)
    }

    /// Hold every call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue `count` rate-limit answers ahead of the fallback.
    pub fn with_rate_limits(self, count: usize) -> Self {
        for _ in 0..count {
            self.push(Err(ExtractorError::RateLimited(
                "RESOURCE_EXHAUSTED".to_string(),
            )));
        }
        self
    }

    pub fn push(&self, answer: Result<String, ExtractorError>) {
        self.script.lock().unwrap().push_back(answer);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReceiptExtractor for ScriptedExtractor {
    async fn extract(&self, document: &[u8], _mime_type: &str) -> Result<String, ExtractorError> {
        assert!(!document.is_empty(), "extractor received an empty document");
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
