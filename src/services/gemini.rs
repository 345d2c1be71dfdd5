//! Gemini `generateContent` adapter for receipt extraction.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ExtractionSettings;

use super::extractor::{ExtractorError, ReceiptExtractor};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Status Google reports when a quota is exhausted.
const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

const EXTRACTION_PROMPT: &str = "\
Analyze this receipt and extract the following details in JSON format:
- merchant_name (the store or company name, exactly as it appears)
- purchased_at (the date of purchase in YYYY-MM-DD format)
- total_amount (the final total amount shown, as a number)
- tax_amount (the tax amount if visible, otherwise 0.00)
- currency (the ISO currency code, e.g. USD, EUR)

Return ONLY the JSON object. Do not include markdown formatting or explanations.";

/// Gemini client over the public Generative Language API.
pub struct GeminiExtractor {
    http_client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl GeminiExtractor {
    /// Create a client from configuration. A missing API key is allowed here;
    /// every extraction then fails with a configuration error.
    pub fn new(settings: &ExtractionSettings) -> Result<Self, ExtractorError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ExtractorError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            timeout: settings.timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Map a non-success response onto the extractor error kinds.
fn classify_failure(status: u16, body: &str) -> ExtractorError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(500).collect());

    let exhausted = parsed
        .as_ref()
        .is_some_and(|e| e.error.status == RESOURCE_EXHAUSTED);

    if status == 429 || exhausted {
        ExtractorError::RateLimited(message)
    } else {
        ExtractorError::Upstream { status, message }
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(response: GenerateResponse) -> Result<String, ExtractorError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ExtractorError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl ReceiptExtractor for GeminiExtractor {
    async fn extract(&self, document: &[u8], mime_type: &str) -> Result<String, ExtractorError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ExtractorError::Configuration("GEMINI_API_KEY is not set".into()))?;

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text {
                        text: EXTRACTION_PROMPT,
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type,
                            data: BASE64.encode(document),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: "application/json",
            },
        };

        debug!(
            "Sending {} byte document to Gemini model {}",
            document.len(),
            self.model
        );

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractorError::Timeout(self.timeout)
                } else {
                    ExtractorError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_failure(status.as_u16(), &body);
            warn!("Gemini request failed ({}): {}", status, error);
            return Err(error);
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            ExtractorError::Transport(format!("Failed to parse Gemini response: {}", e))
        })?;

        response_text(parsed)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
