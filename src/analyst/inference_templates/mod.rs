pub mod gemini;
pub mod openai;

use super::error::{AnalystError, Result};
use reqwest::RequestBuilder;

/// Provider-specific request shape. Responses are decoded independently of
/// the template because providers may answer in either envelope.
pub trait CompletionTemplate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Full endpoint URL for a completion call.
    fn endpoint(&self, base_url: &str, model: &str) -> String;

    /// Request payload for one content/system-instruction pair.
    fn build_request(&self, content: &str, system_instruction: &str, model: &str)
        -> serde_json::Value;

    /// Attach credentials to an outgoing request.
    fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder;
}

pub fn get_template(template_name: &str) -> Result<Box<dyn CompletionTemplate>> {
    match template_name {
        "gemini" | "" => Ok(Box::new(gemini::GeminiTemplate)),
        "openai" => Ok(Box::new(openai::OpenAiTemplate)),
        _ => Err(AnalystError::Config(format!(
            "Unknown completion template: {}. Supported: 'gemini', 'openai'",
            template_name
        ))),
    }
}
