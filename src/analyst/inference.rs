use super::error::{AnalystError, Result};
use super::inference_templates::{get_template, CompletionTemplate};
use crate::shared::config::CompletionConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPurpose {
    TaskBreakdown,
    CodeGeneration,
    CodeRepair,
}

impl fmt::Display for CompletionPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CompletionPurpose::TaskBreakdown => "task_breakdown",
            CompletionPurpose::CodeGeneration => "code_generation",
            CompletionPurpose::CodeRepair => "code_repair",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub content: String,
    pub system_instruction: String,
    pub purpose: CompletionPurpose,
}

/// Text-generation capability used for task breakdown, code generation and
/// code repair. Implementations return the provider's raw JSON envelope.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Value>;
}

/// The two response envelopes a provider may answer with.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEnvelope {
    /// `candidates[0].content.parts[0].text`
    Candidates(String),
    /// `choices[0].message.content`
    Choices(String),
}

impl ResponseEnvelope {
    pub fn decode(response: &Value) -> Result<Self> {
        if let Some(text) = response
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
        {
            return Ok(ResponseEnvelope::Candidates(text.to_string()));
        }
        if let Some(text) = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        {
            return Ok(ResponseEnvelope::Choices(text.to_string()));
        }
        Err(AnalystError::Envelope(clip(&response.to_string(), MAX_ERROR_BODY_CHARS)))
    }

    pub fn into_text(self) -> String {
        match self {
            ResponseEnvelope::Candidates(text) | ResponseEnvelope::Choices(text) => text,
        }
    }
}

/// Lenient decode: an unexpected shape yields an empty string.
pub fn text_or_empty(response: &Value) -> String {
    match ResponseEnvelope::decode(response) {
        Ok(envelope) => envelope.into_text(),
        Err(e) => {
            warn!("Falling back to empty completion text: {}", e);
            String::new()
        }
    }
}

#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    task_model: Option<String>,
    template: Arc<dyn CompletionTemplate>,
    log_seq: Arc<AtomicU64>,
}

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AnalystError::Completion(format!("Failed to create completion client: {}", e))
            })?;

        let template: Arc<dyn CompletionTemplate> = Arc::from(get_template(&config.template)?);

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            task_model: config.task_model.clone(),
            template,
            log_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    fn model_for(&self, purpose: CompletionPurpose) -> &str {
        match (purpose, &self.task_model) {
            (CompletionPurpose::TaskBreakdown, Some(model)) => model,
            _ => &self.model,
        }
    }
}

#[async_trait]
impl Completion for CompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Value> {
        let model = self.model_for(request.purpose);
        let url = self.template.endpoint(&self.base_url, model);
        let body = self
            .template
            .build_request(&request.content, &request.system_instruction, model);

        let log_id = self.log_seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            log_id,
            purpose = %request.purpose,
            template = self.template.name(),
            model,
            content_chars = request.content.len(),
            "Sending completion request"
        );

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = self.template.authorize(builder, key);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response>".to_string());
            return Err(AnalystError::Completion(format!(
                "Completion service error ({}): {}",
                status,
                clip(&text, MAX_ERROR_BODY_CHARS)
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| AnalystError::Completion(format!("Failed to read response text: {}", e)))?;
        debug!(log_id, response_chars = text.len(), "Received completion response");

        serde_json::from_str(&text).map_err(|e| {
            AnalystError::Envelope(format!(
                "response is not JSON ({}): {}",
                e,
                clip(&text, MAX_ERROR_BODY_CHARS)
            ))
        })
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
