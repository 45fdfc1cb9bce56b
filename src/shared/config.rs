use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AnalystConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    /// Request template: `gemini` or `openai`.
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_completion_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Optional cheaper model for the task breakdown call.
    #[serde(default)]
    pub task_model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_install_program")]
    pub install_program: String,
    #[serde(default = "default_install_args")]
    pub install_args: Vec<String>,
    #[serde(default = "default_execution_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_scraper_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkspaceConfig {
    /// Parent directory for per-request workspaces; system temp dir when unset.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub keep_artifacts: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PromptConfig {
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            url: default_completion_url(),
            model: default_model(),
            task_model: None,
            api_key: None,
            timeout_secs: default_completion_timeout(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            url: default_ocr_url(),
            api_key: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            install_program: default_install_program(),
            install_args: default_install_args(),
            timeout_secs: default_execution_timeout(),
            install_timeout_secs: default_install_timeout(),
            max_repair_attempts: default_max_repair_attempts(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_scraper_timeout(),
            sample_rows: default_sample_rows(),
        }
    }
}

impl AnalystConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config at {}: {}", path.display(), e))?;
        let mut config: AnalystConfig = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Failed to parse config JSON at {}: {}", path.display(), e))?;
        config.normalize();
        Ok(config)
    }

    /// Load from the resolved config path, falling back to defaults when no
    /// file exists. Environment overrides are applied either way.
    pub fn load_default() -> Result<(Self, PathBuf)> {
        let path = resolve_config_path();
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            let mut config = Self::default();
            config.normalize();
            config
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok((config, path))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = env_value("AIANALYST_COMPLETION_API_KEY") {
            self.completion.api_key = Some(key);
        }
        if let Some(url) = env_value("AIANALYST_COMPLETION_URL") {
            self.completion.url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = env_value("AIANALYST_COMPLETION_MODEL") {
            self.completion.model = model;
        }
        if let Some(key) = env_value("OCR_API_KEY") {
            self.ocr.api_key = Some(key);
        }
        if let Some(host) = env_value("AIANALYST_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_value("AIANALYST_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.completion.url.is_empty() {
            return Err(anyhow!("completion.url must not be empty"));
        }
        if !matches!(self.completion.template.as_str(), "gemini" | "openai") {
            return Err(anyhow!(
                "Unknown completion template '{}'. Supported: 'gemini', 'openai'",
                self.completion.template
            ));
        }
        if self.execution.timeout_secs == 0 || self.execution.install_timeout_secs == 0 {
            return Err(anyhow!("execution timeouts must be greater than zero"));
        }
        if self.completion.timeout_secs == 0 {
            return Err(anyhow!("completion.timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.server.host = non_empty_or(&self.server.host, default_host);
        self.server.log_dir = non_empty_or(&self.server.log_dir, default_log_dir);

        self.completion.template = self.completion.template.trim().to_ascii_lowercase();
        if self.completion.template.is_empty() {
            self.completion.template = default_template();
        }
        self.completion.url = self.completion.url.trim().trim_end_matches('/').to_string();
        self.completion.model = non_empty_or(&self.completion.model, default_model);
        self.completion.api_key = trimmed_option(self.completion.api_key.take());
        self.completion.task_model = trimmed_option(self.completion.task_model.take());

        self.ocr.url = non_empty_or(&self.ocr.url, default_ocr_url);
        self.ocr.api_key = trimmed_option(self.ocr.api_key.take());

        self.execution.interpreter = non_empty_or(&self.execution.interpreter, default_interpreter);
        self.execution.install_program =
            non_empty_or(&self.execution.install_program, default_install_program);

        self.workspace.root = trimmed_option(self.workspace.root.take()).map(expand_path_string);
        self.prompts.dir = trimmed_option(self.prompts.dir.take()).map(expand_path_string);
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

fn non_empty_or(value: &str, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn trimmed_option(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_template() -> String {
    "gemini".to_string()
}

fn default_completion_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_completion_timeout() -> u64 {
    300
}

fn default_ocr_url() -> String {
    "https://api.ocr.space/parse/image".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_install_program() -> String {
    "pip".to_string()
}

fn default_install_args() -> Vec<String> {
    vec!["install".to_string()]
}

fn default_execution_timeout() -> u64 {
    120
}

fn default_install_timeout() -> u64 {
    60
}

fn default_max_repair_attempts() -> u32 {
    3
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_scraper_timeout() -> u64 {
    30
}

fn default_sample_rows() -> usize {
    3
}

pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("AIANALYST_CONFIG_PATH") {
        return expand_path(path);
    }

    default_config_path()
}

fn expand_path_string(input: String) -> String {
    expand_path(input).to_string_lossy().to_string()
}

fn expand_path(input: String) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}

fn default_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aianalyst")
        .join("aianalyst.json")
}

fn home_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}
