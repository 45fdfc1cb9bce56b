use super::CompletionTemplate;
use reqwest::RequestBuilder;
use serde_json::{json, Value};

pub struct GeminiTemplate;

impl CompletionTemplate for GeminiTemplate {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn endpoint(&self, base_url: &str, model: &str) -> String {
        format!("{}/models/{}:generateContent", base_url, model)
    }

    fn build_request(&self, content: &str, system_instruction: &str, _model: &str) -> Value {
        json!({
            "contents": [
                {"role": "user", "parts": [{"text": content}]}
            ],
            "system_instruction": {
                "parts": [{"text": system_instruction}]
            }
        })
    }

    fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        request.header("x-goog-api-key", api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_content_and_system_instruction() {
        let body = GeminiTemplate.build_request("question", "be terse", "gemini-2.5-pro");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "question");
        assert_eq!(body["system_instruction"]["parts"][0]["text"], "be terse");
        assert_eq!(
            GeminiTemplate.endpoint("https://g.example/v1beta", "gemini-2.5-pro"),
            "https://g.example/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }
}
