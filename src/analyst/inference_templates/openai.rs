use super::CompletionTemplate;
use reqwest::RequestBuilder;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
}

/// OpenAI-compatible chat completions (OpenAI, OpenRouter, vLLM, ...).
pub struct OpenAiTemplate;

impl CompletionTemplate for OpenAiTemplate {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn endpoint(&self, base_url: &str, _model: &str) -> String {
        format!("{}/chat/completions", base_url)
    }

    fn build_request(&self, content: &str, system_instruction: &str, model: &str) -> Value {
        let request = ChatRequest {
            model,
            messages: vec![
                Message {
                    role: "system",
                    content: system_instruction,
                },
                Message {
                    role: "user",
                    content,
                },
            ],
            stream: false,
        };
        serde_json::to_value(request).unwrap_or(Value::Null)
    }

    fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        request.header("Authorization", format!("Bearer {}", api_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_puts_system_message_first() {
        let body = OpenAiTemplate.build_request("question", "be terse", "gpt-4.1");
        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be terse");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["stream"], false);
    }
}
