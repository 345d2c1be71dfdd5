//! Port to the external receipt extraction service.

use std::time::Duration;

use async_trait::async_trait;

/// MIME type of the documents the pipeline accepts.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Why an extraction call did not return text.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractorError {
    /// The service is over capacity; retry later
    #[error("Rate limited by extraction service: {0}")]
    RateLimited(String),

    /// The adapter is not configured (e.g. missing credential)
    #[error("Extraction service not configured: {0}")]
    Configuration(String),

    /// The call did not finish in time
    #[error("Extraction timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The request never got a response
    #[error("Extraction request failed: {0}")]
    Transport(String),

    /// The service answered with an error status
    #[error("Extraction service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The service answered without any text
    #[error("Extraction service returned no text")]
    EmptyResponse,
}

impl ExtractorError {
    /// Rate limits are the only failures worth retrying.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Turns a receipt document into the service's raw text answer.
///
/// The answer is expected to contain a JSON object somewhere in it; locating
/// and normalizing it is the caller's job.
#[async_trait]
pub trait ReceiptExtractor: Send + Sync {
    async fn extract(&self, document: &[u8], mime_type: &str) -> Result<String, ExtractorError>;

    /// Name used in logs.
    fn name(&self) -> &str;
}
