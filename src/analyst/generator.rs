use super::context::AnalysisContext;
use super::error::Result;
use super::inference::{
    text_or_empty, Completion, CompletionPurpose, CompletionRequest, ResponseEnvelope,
};
use super::prompts::Prompts;
use std::sync::Arc;
use tracing::info;

const FENCE: &str = "```";

/// Talks to the completion capability on behalf of the pipeline.
#[derive(Clone)]
pub struct CodeGenerator {
    completion: Arc<dyn Completion>,
    prompts: Prompts,
}

impl CodeGenerator {
    pub fn new(completion: Arc<dyn Completion>, prompts: Prompts) -> Self {
        Self {
            completion,
            prompts,
        }
    }

    /// Advisory plan for the question. An unexpected envelope yields an
    /// empty breakdown rather than failing the request.
    pub async fn break_down_tasks(&self, question: &str) -> Result<String> {
        let response = self
            .completion
            .complete(CompletionRequest {
                content: question.to_string(),
                system_instruction: self.prompts.task_breaker.clone(),
                purpose: CompletionPurpose::TaskBreakdown,
            })
            .await?;
        Ok(text_or_empty(&response))
    }

    /// Initial program text for the assembled context.
    pub async fn generate(&self, context: &AnalysisContext) -> Result<String> {
        let prompt = context.generation_prompt(&self.prompts.code_instructions);
        let response = self
            .completion
            .complete(CompletionRequest {
                content: prompt,
                system_instruction: self.prompts.code_system.clone(),
                purpose: CompletionPurpose::CodeGeneration,
            })
            .await?;
        let raw = ResponseEnvelope::decode(&response)?.into_text();
        let code = strip_code_fences(&raw);
        info!(chars = code.len(), "Generated program");
        Ok(code)
    }

    /// Replacement program text for a fix prompt.
    pub async fn repair(&self, fix_prompt: String) -> Result<String> {
        let response = self
            .completion
            .complete(CompletionRequest {
                content: fix_prompt,
                system_instruction: self.prompts.repair_system.clone(),
                purpose: CompletionPurpose::CodeRepair,
            })
            .await?;
        let raw = ResponseEnvelope::decode(&response)?.into_text();
        Ok(strip_fenced_lines(&raw))
    }
}

/// Remove every code-fence marker (including a `python` tag) anywhere in
/// the text.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.contains(FENCE) {
        return trimmed.to_string();
    }
    trimmed
        .replace("```python", "")
        .replace("```py", "")
        .replace(FENCE, "")
        .trim()
        .to_string()
}

/// Line-oriented fence removal for repair responses, which may contain
/// several fenced segments. Fence lines toggle the in-block state and are
/// dropped; lines inside a block are kept; lines outside a block are kept
/// unless they carry a stray fence marker.
pub fn strip_fenced_lines(raw: &str) -> String {
    let mut kept = Vec::new();
    let mut in_block = false;
    for line in raw.split('\n') {
        if line.trim_start().starts_with(FENCE) {
            in_block = !in_block;
            continue;
        }
        if in_block || !line.contains(FENCE) {
            kept.push(line);
        }
    }
    kept.join("\n").trim().to_string()
}
