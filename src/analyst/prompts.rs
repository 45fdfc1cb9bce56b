use std::path::Path;
use tracing::debug;

const TASK_BREAKER: &str = "You are a data analysis planner. Break the user's question into a short, \
numbered list of concrete steps a Python program must perform to answer it: which data sources to \
load, how to clean them, which computations to run and which charts to draw. Mention the exact \
output structure the question asks for (JSON object keys or JSON array order). Do not write code.";

const CODE_INSTRUCTIONS: &str = "Write a single self-contained Python 3 program that answers the \
question using the data sources described in the data summary.
- Load tabular files with pandas using exactly the file names listed; query parquet or database \
sources with duckdb using exactly the paths listed.
- Clean numeric columns before computing (strip currency symbols, commas, footnote markers).
- When a chart is requested, draw it with matplotlib using the Agg backend, save it to an in-memory \
buffer with plt.savefig(buf, format='png'), and encode it as a base64 data URI; keep each image \
under 100,000 characters.
- Print exactly one JSON document to stdout with json.dumps as the final output, shaped the way \
the question asks. Print nothing else to stdout.
- Convert numpy and pandas scalars to plain Python types before serializing.";

const CODE_SYSTEM: &str = "You are a great Python code developer. Who write final code for the \
answer and our workflow using all the detail provided to you IMPORTANT: Output only valid Python \
code without any comments, explanations, markdown formatting, or triple backticks.";

const REPAIR_SYSTEM: &str = "You are a helpful Python code fixer.";

/// Prompt texts used by the generator and the repair loop.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub task_breaker: String,
    pub code_instructions: String,
    pub code_system: String,
    pub repair_system: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            task_breaker: TASK_BREAKER.to_string(),
            code_instructions: CODE_INSTRUCTIONS.to_string(),
            code_system: CODE_SYSTEM.to_string(),
            repair_system: REPAIR_SYSTEM.to_string(),
        }
    }
}

impl Prompts {
    /// Built-ins, with `task_breaker.txt` and `unified_code_instructions.txt`
    /// from `dir` taking precedence when present.
    pub fn load(dir: Option<&Path>) -> Self {
        let mut prompts = Self::default();
        let Some(dir) = dir else {
            return prompts;
        };
        if let Some(text) = read_prompt_file(&dir.join("task_breaker.txt")) {
            prompts.task_breaker = text;
        }
        if let Some(text) = read_prompt_file(&dir.join("unified_code_instructions.txt")) {
            prompts.code_instructions = text;
        }
        prompts
    }
}

fn read_prompt_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => {
            debug!("Prompt file {} is empty, using built-in", path.display());
            None
        }
        Err(e) => {
            debug!("Prompt file {} unavailable ({}), using built-in", path.display(), e);
            None
        }
    }
}
