use super::error::{AnalystError, Result};
use super::models::ImageNote;
use crate::shared::config::OcrConfig;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

pub const OCR_SKIPPED_NOTE: &str = "OCR API key not configured - image text extraction skipped";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(default = "errored_by_default")]
    is_errored_on_processing: bool,
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    error_message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}

fn errored_by_default() -> bool {
    true
}

/// Stateless text extraction for uploaded images.
pub struct OcrClient {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl OcrClient {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AnalystError::Ocr(format!("Failed to create OCR client: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Note to attach to the question. Missing credentials are a soft skip
    /// and any failure is logged and yields `None`.
    pub async fn describe_image(&self, image: &[u8]) -> Option<ImageNote> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("OCR_API_KEY not found - skipping image processing");
            return Some(ImageNote::Skipped(OCR_SKIPPED_NOTE.to_string()));
        };

        match self.extract_text(image, api_key).await {
            Ok(Some(text)) => {
                info!(chars = text.len(), "Text extracted from image");
                Some(ImageNote::Extracted(text))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Error extracting text from image: {}", e);
                None
            }
        }
    }

    async fn extract_text(&self, image: &[u8], api_key: &str) -> Result<Option<String>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let data_uri = format!("data:image/png;base64,{}", encoded);
        let form = [
            ("base64Image", data_uri.as_str()),
            ("apikey", api_key),
            ("language", "eng"),
            ("scale", "true"),
            ("OCREngine", "1"),
        ];

        let resp = self
            .client
            .post(&self.url)
            .header("User-Agent", USER_AGENT)
            .form(&form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AnalystError::Ocr(format!("OCR API error: {}", resp.status())));
        }

        let body: OcrResponse = resp.json().await?;
        if body.is_errored_on_processing {
            return Err(AnalystError::Ocr(format!(
                "OCR processing failed: {}",
                body.error_message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        Ok(body
            .parsed_results
            .into_iter()
            .next()
            .map(|r| r.parsed_text.trim().to_string())
            .filter(|t| !t.is_empty()))
    }
}
