use super::context::{AllowList, AnalysisContext};
use super::executor::{ProgramRunner, SandboxedExecutor};
use super::generator::CodeGenerator;
use super::models::{ExecutionOutcome, GeneratedProgram, ResultPayload};
use super::result::extract_json;
use super::sanitizer::Sanitizer;
use super::workspace::{Workspace, PROGRAM_FILE};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const MAX_CONTEXT_CHARS: usize = 8000;

const FIXING_INSTRUCTIONS: &str = "FIXING INSTRUCTIONS:
1. Do NOT add new logic, data sources, or change the question requirements.
2. Only fix the exact errors found. Keep ALL original logic and structure unchanged.
3. Do NOT replace real data with fake or random data.
4. Do NOT hallucinate functions, variables, or imports.
5. Use ONLY the data sources listed in the AVAILABLE DATA section, with their exact file names.
6. Ensure the final output is valid JSON printed with json.dumps().
7. Make the code complete and executable.

COMMON FIXES NEEDED:
- Fix file path references to match available files
- Add missing imports
- Fix syntax errors
- Ensure proper JSON output format

Return ONLY the corrected Python code (no markdown, no explanations):";

const ECHO_DIRECTIVE: &str =
    "IMPORTANT: If you cannot fix the code without changing the logic, output the original code unchanged.";

/// Final state of one request's generate-execute-repair cycle.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub payload: ResultPayload,
    /// Repair attempts made, not counting the initial run.
    pub attempts: u32,
    /// Distinct program versions that were executed.
    pub executions: u32,
    pub elapsed: Duration,
}

enum Attempt {
    Succeeded(Value),
    /// `ran` is the sanitized text handed to the interpreter.
    Failed { ran: String, error_context: String },
}

/// Last failing program and the error context it produced.
struct CachedFailure {
    /// Text as the model returned it.
    source: String,
    /// Text that actually executed.
    ran: String,
    error_context: String,
}

impl CachedFailure {
    fn echoed_by(&self, candidate: &str) -> bool {
        candidate == self.source || candidate == self.ran
    }
}

pub struct RepairLoop<R: ProgramRunner> {
    generator: CodeGenerator,
    executor: Arc<SandboxedExecutor<R>>,
    sanitizer: Option<Arc<Sanitizer>>,
    max_repairs: u32,
}

impl<R: ProgramRunner> RepairLoop<R> {
    pub fn new(
        generator: CodeGenerator,
        executor: Arc<SandboxedExecutor<R>>,
        sanitizer: Option<Arc<Sanitizer>>,
        max_repairs: u32,
    ) -> Self {
        Self {
            generator,
            executor,
            sanitizer,
            max_repairs,
        }
    }

    /// Run `initial` and, on failure, up to `max_repairs` repaired versions.
    /// Elapsed time in the report is measured from `started`.
    pub async fn run(
        &self,
        initial: String,
        context: &AnalysisContext,
        workspace: &Workspace,
        started: Instant,
    ) -> LoopReport {
        let mut program = GeneratedProgram::initial(initial);
        let mut executions = 0;

        let mut cached = match self.attempt(&program, &context.allow_list, workspace).await {
            Attempt::Succeeded(value) => {
                return report(ResultPayload::Success(value), 0, 1, started);
            }
            Attempt::Failed { ran, error_context } => CachedFailure {
                source: program.text.clone(),
                ran,
                error_context,
            },
        };
        executions += 1;

        for attempt in 1..=self.max_repairs {
            info!(
                request_id = %workspace.request_id(),
                attempt,
                max = self.max_repairs,
                "Repairing program"
            );
            let prompt = fix_prompt(&cached.ran, &cached.error_context, context);
            let candidate = match self.generator.repair(prompt).await {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => {
                    warn!(attempt, "Repair returned no code");
                    continue;
                }
                Err(e) => {
                    warn!(attempt, "Repair request failed: {}", e);
                    continue;
                }
            };
            program = program.supersede(candidate);

            if cached.echoed_by(&program.text) {
                info!(attempt, "Repair echoed the failing program, reusing its outcome");
                continue;
            }

            executions += 1;
            match self.attempt(&program, &context.allow_list, workspace).await {
                Attempt::Succeeded(value) => {
                    info!(attempt, "Repaired program produced valid JSON");
                    return report(ResultPayload::Success(value), attempt, executions, started);
                }
                Attempt::Failed { ran, error_context } => {
                    cached = CachedFailure {
                        source: program.text.clone(),
                        ran,
                        error_context,
                    };
                }
            }
        }

        let elapsed = started.elapsed();
        warn!(
            request_id = %workspace.request_id(),
            executions,
            elapsed_secs = elapsed.as_secs_f64(),
            "All repair attempts exhausted"
        );
        LoopReport {
            payload: ResultPayload::exhausted(elapsed.as_secs_f64()),
            attempts: self.max_repairs,
            executions,
            elapsed,
        }
    }

    /// Sanitize, persist and execute one program version.
    async fn attempt(
        &self,
        program: &GeneratedProgram,
        allow_list: &AllowList,
        workspace: &Workspace,
    ) -> Attempt {
        let ran = self.sanitize(&program.text, allow_list);
        let script = match workspace.write_artifact(PROGRAM_FILE, &ran).await {
            Ok(path) => path,
            Err(e) => {
                return Attempt::Failed {
                    ran,
                    error_context: format!("Execution failed with exception: {}", e),
                }
            }
        };

        let outcome = match self.executor.execute(&script, workspace.path()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return Attempt::Failed {
                    ran,
                    error_context: format!("Execution failed with exception: {}", e),
                }
            }
        };
        info!(
            attempt = program.attempt,
            exit_code = outcome.exit_code,
            timed_out = outcome.timed_out,
            "Program executed"
        );

        if outcome.exited_cleanly() {
            if let Some(value) = extract_json(&outcome.stdout) {
                return Attempt::Succeeded(value);
            }
            warn!(attempt = program.attempt, "Program output is not valid JSON");
        }
        Attempt::Failed {
            ran,
            error_context: error_context(&outcome),
        }
    }

    /// Without a sanitizer the text runs as is.
    fn sanitize(&self, code: &str, allow_list: &AllowList) -> String {
        let Some(sanitizer) = &self.sanitizer else {
            return code.to_string();
        };
        let report = sanitizer.sanitize(code, allow_list);
        if report.changed() {
            info!(
                quality_args_removed = report.quality_args_removed,
                blocked = ?report.blocked_paths,
                "Sanitized program"
            );
        }
        report.code
    }
}

fn report(payload: ResultPayload, attempts: u32, executions: u32, started: Instant) -> LoopReport {
    LoopReport {
        payload,
        attempts,
        executions,
        elapsed: started.elapsed(),
    }
}

pub fn error_context(outcome: &ExecutionOutcome) -> String {
    format!(
        "Return code: {}\nStderr: {}\nStdout: {}",
        outcome.exit_code,
        clip_tail(&outcome.stderr),
        clip_tail(&outcome.stdout)
    )
}

/// Keep the last `MAX_CONTEXT_CHARS` characters; tracebacks end with the
/// interesting part.
fn clip_tail(text: &str) -> &str {
    let count = text.chars().count();
    if count <= MAX_CONTEXT_CHARS {
        return text;
    }
    let skip = count - MAX_CONTEXT_CHARS;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[start..]
}

pub fn fix_prompt(current_code: &str, error_context: &str, context: &AnalysisContext) -> String {
    format!(
        "URGENT CODE FIXING TASK:\n\
         CURRENT BROKEN CODE:\n```python\n{}\n```\n\
         ERROR DETAILS:\n{}\n\
         AVAILABLE DATA (use these exact sources):\n{}\n\n\
         ORIGINAL TASK:\n{}\n\n\
         TASK BREAKDOWN:\n{}\n\n\
         {}\n\n{}\n\n{}",
        current_code,
        error_context,
        context.summary_json,
        context.question,
        context.task_breakdown,
        context.allow_list.render(),
        FIXING_INSTRUCTIONS,
        ECHO_DIRECTIVE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyst::context::DataSummary;
    use crate::analyst::error::{AnalystError, Result};
    use crate::analyst::executor::testing::{failed, ok, ScriptedRunner};
    use crate::analyst::inference::{Completion, CompletionRequest};
    use crate::analyst::models::EXHAUSTED_MESSAGE;
    use crate::analyst::prompts::Prompts;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers repair requests with queued program texts.
    struct ScriptedRepairs {
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedRepairs {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Completion for ScriptedRepairs {
        async fn complete(&self, request: CompletionRequest) -> Result<Value> {
            self.prompts.lock().unwrap().push(request.content);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("print('still broken')".to_string()))?;
            Ok(json!({"candidates": [{"content": {"parts": [{"text": reply}]}}]}))
        }
    }

    fn context() -> AnalysisContext {
        AnalysisContext::new(
            "Which film grossed most?".to_string(),
            "1. load\n2. sort".to_string(),
            DataSummary::new(vec![]),
        )
    }

    fn repair_loop(
        runner: ScriptedRunner,
        repairs: Arc<ScriptedRepairs>,
    ) -> RepairLoop<ScriptedRunner> {
        let executor = Arc::new(SandboxedExecutor::new(
            runner,
            Duration::from_secs(120),
            Duration::from_secs(60),
        ));
        RepairLoop::new(
            CodeGenerator::new(repairs, Prompts::default()),
            executor,
            Sanitizer::new().ok().map(Arc::new),
            3,
        )
    }

    fn executor_of(loop_: &RepairLoop<ScriptedRunner>) -> &ScriptedRunner {
        loop_.executor.runner()
    }

    #[tokio::test]
    async fn initial_success_skips_repair() {
        let repairs = ScriptedRepairs::new(vec![]);
        let lp = repair_loop(ScriptedRunner::new(vec![ok("{\"answer\": 42}")]), repairs.clone());
        let ws = Workspace::create(None, false).unwrap();

        let report = lp.run("print(1)".to_string(), &context(), &ws, Instant::now()).await;
        assert_eq!(report.payload, ResultPayload::Success(json!({"answer": 42})));
        assert_eq!(report.attempts, 0);
        assert_eq!(report.executions, 1);
        assert!(repairs.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clean_exit_without_json_goes_to_repair() {
        let repairs = ScriptedRepairs::new(vec![Ok("print('[1, 2]')".to_string())]);
        let runner = ScriptedRunner::new(vec![ok("The answer is 42"), ok("[1, 2]")]);
        let lp = repair_loop(runner, repairs.clone());
        let ws = Workspace::create(None, false).unwrap();

        let report = lp.run("print('The answer is 42')".to_string(), &context(), &ws, Instant::now()).await;
        assert_eq!(report.payload, ResultPayload::Success(json!([1, 2])));
        assert_eq!(report.attempts, 1);

        let prompts = repairs.prompts.lock().unwrap();
        assert!(prompts[0].contains("CURRENT BROKEN CODE:\n```python\nprint('The answer is 42')\n```"));
        assert!(prompts[0].contains("Return code: 0\nStderr: \nStdout: The answer is 42"));
        assert!(prompts[0].contains("ORIGINAL TASK:\nWhich film grossed most?"));
        assert!(prompts[0].ends_with(ECHO_DIRECTIVE));
    }

    #[tokio::test]
    async fn exhaustion_after_three_repairs_runs_at_most_four_times() {
        let repairs = ScriptedRepairs::new(vec![
            Ok("print('a')".to_string()),
            Ok("print('b')".to_string()),
            Ok("print('c')".to_string()),
        ]);
        let runner = ScriptedRunner::new(vec![
            failed("SyntaxError"),
            ok("not json"),
            ok("still not json"),
            failed("KeyError"),
        ]);
        let lp = repair_loop(runner, repairs.clone());
        let ws = Workspace::create(None, false).unwrap();

        let report = lp.run("print(".to_string(), &context(), &ws, Instant::now()).await;
        assert_eq!(executor_of(&lp).run_count(), 4);
        assert_eq!(report.executions, 4);
        assert_eq!(report.attempts, 3);
        assert_eq!(repairs.prompts.lock().unwrap().len(), 3);

        let body = serde_json::to_value(&report.payload).unwrap();
        assert_eq!(body["error"], json!(EXHAUSTED_MESSAGE));
        assert!(body["time"].as_f64().unwrap() >= 0.0);
        assert_eq!(body.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unchanged_repair_reuses_cached_outcome() {
        let repairs = ScriptedRepairs::new(vec![
            Ok("print(".to_string()),
            Ok("print(json.dumps({}))".to_string()),
        ]);
        let runner = ScriptedRunner::new(vec![failed("SyntaxError"), ok("{}")]);
        let lp = repair_loop(runner, repairs.clone());
        let ws = Workspace::create(None, false).unwrap();

        let report = lp.run("print(".to_string(), &context(), &ws, Instant::now()).await;
        assert!(report.payload.is_success());
        assert_eq!(report.attempts, 2);
        assert_eq!(executor_of(&lp).run_count(), 2);

        let prompts = repairs.prompts.lock().unwrap();
        assert!(prompts[1].contains("Stderr: SyntaxError"));
    }

    #[tokio::test]
    async fn failed_repair_request_counts_as_attempt() {
        let repairs = ScriptedRepairs::new(vec![
            Err(AnalystError::Completion("503".to_string())),
            Err(AnalystError::Envelope("{}".to_string())),
            Err(AnalystError::Completion("503".to_string())),
        ]);
        let lp = repair_loop(ScriptedRunner::new(vec![failed("boom")]), repairs.clone());
        let ws = Workspace::create(None, false).unwrap();

        let report = lp.run("x".to_string(), &context(), &ws, Instant::now()).await;
        assert!(!report.payload.is_success());
        assert_eq!(executor_of(&lp).run_count(), 1);
        assert_eq!(repairs.prompts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_module_installs_once_per_execution() {
        let repairs = ScriptedRepairs::new(vec![Ok("import xyz\nprint('{}')".to_string())]);
        let runner = ScriptedRunner::new(vec![
            failed("ModuleNotFoundError: No module named 'xyz'"),
            failed("ModuleNotFoundError: No module named 'xyz'"),
            ok("{}"),
        ]);
        let lp = repair_loop(runner, repairs);
        let ws = Workspace::create(None, false).unwrap();

        let report = lp.run("import xyz".to_string(), &context(), &ws, Instant::now()).await;
        assert!(report.payload.is_success());
        assert_eq!(executor_of(&lp).install_count(), 1);
        assert_eq!(executor_of(&lp).installs.lock().unwrap()[0], "xyz");
    }

    #[tokio::test]
    async fn repaired_programs_are_sanitized_before_running() {
        let repairs = ScriptedRepairs::new(vec![Ok(
            "```python\ndf = pd.read_csv('/etc/passwd')\nplt.savefig(buf, format='png', quality=90)\n```"
                .to_string(),
        )]);
        let runner = ScriptedRunner::new(vec![failed("boom"), ok("{}")]);
        let lp = repair_loop(runner, repairs);
        let ws = Workspace::create(None, false).unwrap();

        lp.run("x".to_string(), &context(), &ws, Instant::now()).await;
        let runs = executor_of(&lp).runs.lock().unwrap();
        assert_eq!(runs[1], "df = ''\nplt.savefig(buf, format='png')");
    }

    #[tokio::test]
    async fn repair_prompt_shows_the_program_that_ran() {
        let repairs = ScriptedRepairs::new(vec![Ok("print(json.dumps({}))".to_string())]);
        let runner = ScriptedRunner::new(vec![failed("TypeError: 'str' has no attribute 'head'"), ok("{}")]);
        let lp = repair_loop(runner, repairs.clone());
        let ws = Workspace::create(None, false).unwrap();

        let initial = "df = pd.read_csv('/etc/passwd')\nprint(df.head())";
        let report = lp.run(initial.to_string(), &context(), &ws, Instant::now()).await;
        assert!(report.payload.is_success());

        let ran = "df = ''\nprint(df.head())";
        assert_eq!(executor_of(&lp).runs.lock().unwrap()[0], ran);
        let prompts = repairs.prompts.lock().unwrap();
        assert!(prompts[0].contains(&format!("CURRENT BROKEN CODE:\n```python\n{}\n```", ran)));
        assert!(!prompts[0].contains("/etc/passwd"));
    }

    #[tokio::test]
    async fn echo_of_the_sanitized_program_is_not_rerun() {
        let repairs = ScriptedRepairs::new(vec![
            Ok("df = ''\nprint(df.head())".to_string()),
            Ok("print('{}')".to_string()),
        ]);
        let runner = ScriptedRunner::new(vec![failed("AttributeError"), ok("{}")]);
        let lp = repair_loop(runner, repairs);
        let ws = Workspace::create(None, false).unwrap();

        let initial = "df = pd.read_csv('/etc/passwd')\nprint(df.head())";
        let report = lp.run(initial.to_string(), &context(), &ws, Instant::now()).await;
        assert!(report.payload.is_success());
        assert_eq!(report.attempts, 2);
        assert_eq!(executor_of(&lp).run_count(), 2);
    }

    #[test]
    fn long_output_is_clipped_from_the_front() {
        let outcome = ExecutionOutcome {
            exit_code: 1,
            stderr: format!("{}Traceback end", "x".repeat(9000)),
            ..Default::default()
        };
        let context = error_context(&outcome);
        assert!(context.contains("Traceback end"));
        assert!(context.len() < 8100);
    }
}
