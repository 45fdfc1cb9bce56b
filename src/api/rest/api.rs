use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use crate::analyst::Analyst;
use crate::api::rest::create_router;
use crate::api::rest::state::AppState;
use crate::shared::config::AnalystConfig;

pub async fn run_rest_server(config: AnalystConfig) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("Shutting down AI Analyst API...");
        std::process::exit(0);
    })?;

    // Log startup banner
    info!(
        r#"
    _    ___    _                _           _
   / \  |_ _|  / \   _ __   __ _| |_   _ ___| |_
  / _ \  | |  / _ \ | '_ \ / _` | | | | / __| __|
 / ___ \ | | / ___ \| | | | (_| | | |_| \__ \ |_
/_/   \_\___/_/   \_\_| |_|\__,_|_|\__, |___/\__|
                                   |___/
Starting AI Analyst REST API service...
PID: {}
"#,
        std::process::id()
    );

    info!(
        template = %config.completion.template,
        model = %config.completion.model,
        interpreter = %config.execution.interpreter,
        timeout_secs = config.execution.timeout_secs,
        max_repairs = config.execution.max_repair_attempts,
        "Loaded configuration"
    );
    if config.completion.api_key.is_none() {
        info!("No completion API key configured; requests are sent unauthenticated");
    }

    let analyst = match Analyst::from_config(&config) {
        Ok(analyst) => analyst,
        Err(e) => {
            error!("Failed to initialize analyst pipeline: {}", e);
            return Err(anyhow::anyhow!("Analyst pipeline not available: {}", e));
        }
    };
    let app_state = Arc::new(AppState::new(analyst));

    // Build REST router
    info!("Building REST API routes...");
    let app = create_router(app_state);

    // Start server
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("API started successfully!");
    info!(
        "REST API Endpoint: http://{}:{}/api/v0",
        config.server.host, config.server.port
    );
    info!("Ready to accept requests...");

    axum::serve(listener, app).await?;
    Ok(())
}
