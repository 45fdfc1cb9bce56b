use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};

#[path = "../analyst/mod.rs"]
mod analyst;
#[path = "../api/mod.rs"]
mod api;
#[path = "../shared/mod.rs"]
mod shared;

use shared::config::AnalystConfig;

#[derive(Parser)]
#[command(name = "aianalyst-api")]
#[command(about = "AI Analyst - answers data questions by generating and running analysis programs")]
struct Args {
    /// Config file (defaults to AIANALYST_CONFIG_PATH or ~/.aianalyst/aianalyst.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let mut config = AnalystConfig::load_from_path(path)?;
            config.apply_env_overrides();
            config
        }
        None => AnalystConfig::load_default()?.0,
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    // Initialize service logging
    let _logging = shared::logging::init_service_logging(
        Path::new(&config.server.log_dir),
        "aianalyst_api",
    );

    // Run the API server
    api::rest::api::run_rest_server(config).await
}
