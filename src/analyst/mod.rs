pub mod acquire;
pub mod context;
pub mod error;
pub mod executor;
pub mod generator;
pub mod inference;
pub mod inference_templates;
pub mod models;
pub mod ocr;
pub mod prompts;
pub mod repair;
pub mod result;
pub mod sanitizer;
pub mod sources;
pub mod tables;
pub mod workspace;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::shared::config::{AnalystConfig, WorkspaceConfig};
use acquire::{DuckDbInspector, HttpTableScraper, SchemaInspector, SourceAcquirer, TableScraper};
use context::{AnalysisContext, DataSummary};
use error::Result;
use executor::{ProcessRunner, ProgramRunner, SandboxedExecutor};
use generator::CodeGenerator;
use inference::{Completion, CompletionClient};
use models::{ImageNote, Question};
use ocr::OcrClient;
use prompts::Prompts;
use repair::{LoopReport, RepairLoop};
use sanitizer::Sanitizer;
use sources::extract_sources;
use workspace::{Workspace, DATA_SUMMARY_FILE, TASK_BREAKDOWN_FILE};

/// Coordinates one question from source discovery to the final payload.
pub struct Analyst<R: ProgramRunner + 'static = ProcessRunner> {
    generator: CodeGenerator,
    acquirer: SourceAcquirer,
    ocr: OcrClient,
    repair: RepairLoop<R>,
    workspace: WorkspaceConfig,
}

impl Analyst<ProcessRunner> {
    pub fn from_config(config: &AnalystConfig) -> Result<Self> {
        let completion = Arc::new(CompletionClient::new(&config.completion)?);
        let scraper = Arc::new(HttpTableScraper::new(&config.scraper)?);
        Self::with_parts(
            config,
            completion,
            ProcessRunner::new(&config.execution),
            scraper,
            None,
        )
    }
}

impl<R: ProgramRunner + 'static> Analyst<R> {
    /// Assemble from explicit collaborators. Without an inspector, database
    /// sources are introspected through `runner`.
    pub fn with_parts(
        config: &AnalystConfig,
        completion: Arc<dyn Completion>,
        runner: R,
        scraper: Arc<dyn TableScraper>,
        inspector: Option<Arc<dyn SchemaInspector>>,
    ) -> Result<Self> {
        let executor = Arc::new(SandboxedExecutor::new(
            runner,
            config.execution.timeout(),
            config.execution.install_timeout(),
        ));
        let inspector: Arc<dyn SchemaInspector> = match inspector {
            Some(inspector) => inspector,
            None => Arc::new(DuckDbInspector::new(
                executor.clone(),
                config.scraper.sample_rows,
            )),
        };

        let sanitizer = match Sanitizer::new() {
            Ok(sanitizer) => Some(Arc::new(sanitizer)),
            Err(e) => {
                warn!("Sanitizer unavailable, programs will run unmodified: {}", e);
                None
            }
        };

        let prompts = Prompts::load(config.prompts.dir.as_deref().map(std::path::Path::new));
        let generator = CodeGenerator::new(completion, prompts);

        Ok(Self {
            repair: RepairLoop::new(
                generator.clone(),
                executor,
                sanitizer,
                config.execution.max_repair_attempts,
            ),
            generator,
            acquirer: SourceAcquirer::new(scraper, inspector, config.scraper.sample_rows),
            ocr: OcrClient::new(&config.ocr)?,
            workspace: config.workspace.clone(),
        })
    }

    pub async fn describe_image(&self, image: &[u8]) -> Option<ImageNote> {
        self.ocr.describe_image(image).await
    }

    /// Answer `question`. Exhausting the repair budget is a normal report;
    /// errors are reserved for failures before the first program exists.
    pub async fn answer(&self, question: &Question) -> Result<LoopReport> {
        let started = Instant::now();
        let root = self.workspace.root.as_ref().map(PathBuf::from);
        let workspace = Workspace::create(root.as_deref(), self.workspace.keep_artifacts)?;
        let request_id = workspace.request_id().to_string();
        let question_text = question.prompt_text();
        info!(request_id = %request_id, chars = question_text.len(), "Processing question");

        let mut descriptors = Vec::new();
        if let Some(csv) = question.provided_csv() {
            match self.acquirer.describe_provided(csv, &workspace).await {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => warn!(request_id = %request_id, "Error processing provided CSV: {}", e),
            }
        }

        let sources = extract_sources(&question_text);
        info!(
            request_id = %request_id,
            urls = sources.scrape_urls.len(),
            databases = sources.database_files.len(),
            "Extracted data sources"
        );
        descriptors.extend(self.acquirer.acquire_all(&sources, &workspace).await);

        let summary = DataSummary::new(descriptors);
        workspace
            .write_artifact(DATA_SUMMARY_FILE, &summary.to_pretty_json())
            .await?;

        let breakdown = self.generator.break_down_tasks(&question_text).await?;
        workspace.write_artifact(TASK_BREAKDOWN_FILE, &breakdown).await?;

        let context = AnalysisContext::new(question_text, breakdown, summary);
        info!(
            request_id = %request_id,
            sources = context.summary.total_sources,
            "Context assembled"
        );

        let program = self.generator.generate(&context).await?;
        let report = self.repair.run(program, &context, &workspace, started).await;
        info!(
            request_id = %request_id,
            success = report.payload.is_success(),
            repairs = report.attempts,
            executions = report.executions,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Request finished"
        );
        Ok(report)
    }
}
