use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[path = "../../src/analyst/mod.rs"]
mod analyst;
#[path = "../../src/shared/mod.rs"]
mod shared;

use analyst::models::Question;
use analyst::Analyst;
use shared::config::{resolve_config_path, AnalystConfig};

#[derive(Parser)]
#[command(name = "aianalyst")]
#[command(about = "Run AI Analyst questions locally and inspect its configuration")]
struct Cli {
    /// Config file (defaults to AIANALYST_CONFIG_PATH or ~/.aianalyst/aianalyst.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer the question in FILE and print the JSON payload
    Ask {
        file: PathBuf,
        /// Image whose text is appended to the question
        #[arg(long)]
        image: Option<PathBuf>,
        /// Table to provide as ProvidedCSV.csv
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Validate configuration and check the interpreter
    Check,
    /// Print version
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    shared::logging::init_cli_logging(cli.verbose);

    let result = match cli.command {
        Command::Ask {
            ref file,
            ref image,
            ref csv,
        } => cmd_ask(cli.config.clone(), file, image.as_ref(), csv.as_ref()).await,
        Command::Check => cmd_check(cli.config.clone()).await,
        Command::Version => {
            println!("aianalyst {}", env!("CARGO_PKG_VERSION"));
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<(AnalystConfig, PathBuf)> {
    match path {
        Some(path) => {
            let mut config = AnalystConfig::load_from_path(&path)?;
            config.apply_env_overrides();
            config.validate()?;
            Ok((config, path))
        }
        None => AnalystConfig::load_default(),
    }
}

/// Returns whether the program produced a payload.
async fn cmd_ask(
    config_path: Option<PathBuf>,
    file: &PathBuf,
    image: Option<&PathBuf>,
    csv: Option<&PathBuf>,
) -> Result<bool> {
    let (config, _) = load_config(config_path)?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read question file {}", file.display()))?;
    if text.trim().is_empty() {
        return Err(anyhow!("Question file {} is empty", file.display()));
    }

    let analyst = Analyst::from_config(&config)?;

    let note = match image {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            analyst.describe_image(&bytes).await
        }
        None => None,
    };
    let provided = match csv {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read CSV {}", path.display()))?,
        ),
        None => None,
    };

    let question = Question::new(text)
        .with_image_note(note)
        .with_provided_csv(provided);
    let report = analyst.answer(&question).await?;

    println!("{}", serde_json::to_string_pretty(&report.payload)?);
    Ok(report.payload.is_success())
}

async fn cmd_check(config_path: Option<PathBuf>) -> Result<bool> {
    let path = config_path.clone().unwrap_or_else(resolve_config_path);
    let (config, _) = load_config(config_path)?;

    println!("Config:        {}{}", path.display(), if path.exists() { "" } else { " (not found, using defaults)" });
    println!("Template:      {}", config.completion.template);
    println!("Endpoint:      {}", config.completion.url);
    println!("Model:         {}", config.completion.model);
    println!(
        "API key:       {}",
        if config.completion.api_key.is_some() { "set" } else { "missing" }
    );
    println!(
        "OCR key:       {}",
        if config.ocr.api_key.is_some() { "set" } else { "missing (image text skipped)" }
    );
    println!(
        "Execution:     {} (timeout {}s, {} repairs)",
        config.execution.interpreter,
        config.execution.timeout_secs,
        config.execution.max_repair_attempts
    );

    let output = tokio::process::Command::new(&config.execution.interpreter)
        .arg("--version")
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
            let version = if version.is_empty() {
                String::from_utf8_lossy(&out.stderr).trim().to_string()
            } else {
                version
            };
            println!("Interpreter:   {}", version);
            Ok(true)
        }
        Ok(out) => {
            println!("Interpreter:   exited with {}", out.status);
            Ok(false)
        }
        Err(e) => {
            println!("Interpreter:   not runnable ({})", e);
            Ok(false)
        }
    }
}
