use super::error::{AnalystError, Result};
use super::models::ExecutionOutcome;
use crate::shared::config::ExecutionConfig;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};

static MISSING_MODULE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"No module named '([^']+)'").expect("valid regex"));

/// Launches interpreter and installer processes.
#[async_trait]
pub trait ProgramRunner: Send + Sync {
    async fn run_program(
        &self,
        script: &Path,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ExecutionOutcome>;

    async fn install_module(&self, module: &str, timeout: Duration) -> Result<ExecutionOutcome>;
}

/// Runs programs as child processes of the configured interpreter.
pub struct ProcessRunner {
    interpreter: String,
    install_program: String,
    install_args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            install_program: config.install_program.clone(),
            install_args: config.install_args.clone(),
        }
    }

    pub fn with_interpreter(interpreter: &str) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            install_program: "pip".to_string(),
            install_args: vec!["install".to_string()],
        }
    }
}

#[async_trait]
impl ProgramRunner for ProcessRunner {
    async fn run_program(
        &self,
        script: &Path,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ExecutionOutcome> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script).current_dir(cwd);
        run_with_timeout(cmd, timeout, &self.interpreter).await
    }

    async fn install_module(&self, module: &str, timeout: Duration) -> Result<ExecutionOutcome> {
        let mut cmd = Command::new(&self.install_program);
        cmd.args(&self.install_args).arg(module);
        run_with_timeout(cmd, timeout, &self.install_program).await
    }
}

async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<ExecutionOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| AnalystError::Execution(format!("Failed to spawn {}: {}", label, e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ExecutionOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        }),
        Ok(Err(e)) => Err(AnalystError::Execution(format!(
            "Failed waiting for {}: {}",
            label, e
        ))),
        Err(_) => Ok(ExecutionOutcome {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("Execution timed out after {}s", timeout.as_secs()),
            timed_out: true,
        }),
    }
}

/// Top-level package of a module reported missing in `stderr`.
pub fn missing_module(stderr: &str) -> Option<String> {
    MISSING_MODULE_RE
        .captures(stderr)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().split('.').next().unwrap_or(m.as_str()).to_string())
        .filter(|m| !m.is_empty())
}

/// Runs a program under a wall-clock limit with one missing-module recovery.
pub struct SandboxedExecutor<R: ProgramRunner> {
    runner: R,
    timeout: Duration,
    install_timeout: Duration,
}

impl<R: ProgramRunner> SandboxedExecutor<R> {
    pub fn new(runner: R, timeout: Duration, install_timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            install_timeout,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Execute `script` with `cwd` as working directory. A non-zero exit or a
    /// timeout is a normal outcome. When stderr names a missing module, one
    /// install is attempted and the program re-run once; whatever that
    /// second run produces is final.
    pub async fn execute(&self, script: &Path, cwd: &Path) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let outcome = self.runner.run_program(script, cwd, self.timeout).await?;
        if outcome.exit_code == 0 || outcome.timed_out {
            return Ok(outcome);
        }

        let Some(module) = missing_module(&outcome.stderr) else {
            return Ok(outcome);
        };

        warn!(module = %module, "Detected missing module, attempting install");
        match self.runner.install_module(&module, self.install_timeout).await {
            Ok(install) if install.exit_code == 0 => {
                info!(module = %module, "Installed missing module");
            }
            Ok(install) => {
                warn!(
                    module = %module,
                    exit_code = install.exit_code,
                    timed_out = install.timed_out,
                    "Module install failed"
                );
            }
            Err(e) => {
                warn!(module = %module, "Failed to install missing module: {}", e);
            }
        }

        let rerun = self.runner.run_program(script, cwd, self.timeout).await?;
        info!(
            exit_code = rerun.exit_code,
            timed_out = rerun.timed_out,
            took_ms = started.elapsed().as_millis() as u64,
            "Re-ran program after dependency recovery"
        );
        Ok(rerun)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{failed, ok, ScriptedRunner};
    use super::*;

    fn executor(runner: ScriptedRunner) -> SandboxedExecutor<ScriptedRunner> {
        SandboxedExecutor::new(runner, Duration::from_secs(120), Duration::from_secs(60))
    }

    #[test]
    fn missing_module_uses_top_level_package() {
        assert_eq!(
            missing_module("ModuleNotFoundError: No module named 'xyz'"),
            Some("xyz".to_string())
        );
        assert_eq!(
            missing_module("No module named 'scipy.stats'"),
            Some("scipy".to_string())
        );
        assert_eq!(missing_module("NameError: name 'x' is not defined"), None);
    }

    #[tokio::test]
    async fn missing_module_triggers_exactly_one_install_and_rerun() {
        let runner = ScriptedRunner::new(vec![
            failed("ModuleNotFoundError: No module named 'xyz'"),
            failed("ModuleNotFoundError: No module named 'xyz'"),
        ]);
        let exec = executor(runner);
        let dir = tempfile::tempdir().unwrap();

        let outcome = exec
            .execute(&dir.path().join("program.py"), dir.path())
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(exec.runner().install_count(), 1);
        assert_eq!(exec.runner().installs.lock().unwrap()[0], "xyz");
        assert_eq!(exec.runner().run_count(), 2);
    }

    #[tokio::test]
    async fn recovery_result_replaces_first_failure() {
        let runner = ScriptedRunner::new(vec![
            failed("No module named 'tabulate'"),
            ok("{\"a\": 1}"),
        ]);
        let exec = executor(runner);
        let dir = tempfile::tempdir().unwrap();

        let outcome = exec
            .execute(&dir.path().join("program.py"), dir.path())
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "{\"a\": 1}");
    }

    #[tokio::test]
    async fn ordinary_failure_is_returned_without_install() {
        let runner = ScriptedRunner::new(vec![failed("ZeroDivisionError")]);
        let exec = executor(runner);
        let dir = tempfile::tempdir().unwrap();

        let outcome = exec
            .execute(&dir.path().join("program.py"), dir.path())
            .await
            .unwrap();
        assert_eq!(outcome.stderr, "ZeroDivisionError");
        assert_eq!(exec.runner().install_count(), 0);
        assert_eq!(exec.runner().run_count(), 1);
    }

    async fn sh_available() -> bool {
        Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn process_runner_captures_output_and_exit_code() {
        if !sh_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("program.sh");
        std::fs::write(&script, "echo out; echo err >&2; pwd; exit 3\n").unwrap();

        let runner = ProcessRunner::with_interpreter("sh");
        let outcome = runner
            .run_program(&script, dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.stdout.starts_with("out\n"));
        assert_eq!(outcome.stderr.trim(), "err");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn process_runner_reports_timeout_as_outcome() {
        if !sh_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("program.sh");
        std::fs::write(&script, "sleep 10\n").unwrap();

        let exec = SandboxedExecutor::new(
            ProcessRunner::with_interpreter("sh"),
            Duration::from_millis(200),
            Duration::from_secs(1),
        );
        let outcome = exec.execute(&script, dir.path()).await.unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, -1);
        assert!(!outcome.exited_cleanly());
    }

    #[tokio::test]
    async fn spawn_failure_is_an_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::with_interpreter("definitely-not-an-interpreter-7f3a");
        let err = runner
            .run_program(&dir.path().join("x.py"), dir.path(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalystError::Execution(_)));
    }
}
