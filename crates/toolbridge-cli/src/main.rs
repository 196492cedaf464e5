use std::sync::Arc;

use anyhow::Result;
use toolbridge_core::{
    spawn_line_reader, AnthropicProvider, BridgeConfig, Catalog, DispatchOutcome,
    EndpointRegistry, QueryLoop,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "toolbridge=info,toolbridge_core=info";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeConfig::load()?;
    config.validate()?;

    // ── endpoints ────────────────────────────────────────────────────────────

    let registry = Arc::new(
        EndpointRegistry::connect_all(&config.servers, config.request_timeout()).await?,
    );
    let catalog = Catalog::aggregate(&registry).await?;
    if catalog.is_empty() {
        warn!("the catalog is empty, no endpoint advertised anything");
    }
    for resource in &catalog.resources {
        info!(
            "Resource {} ({}) from endpoint {}",
            resource.info.uri, resource.info.name, resource.endpoint
        );
    }
    for prompt in &catalog.prompts {
        info!("Prompt {} from endpoint {}", prompt.info.name, prompt.endpoint);
    }
    info!(
        "{} endpoint(s), {} tool(s) available to {}",
        registry.len(),
        catalog.tools.len(),
        config.model
    );

    // ── query loop ───────────────────────────────────────────────────────────

    let provider = AnthropicProvider::new(
        config.base_url.clone(),
        config.api_key.clone(),
        config.model.clone(),
        config.max_tokens,
    );
    let mut query_loop = QueryLoop::new(Box::new(provider), registry, catalog, &config);

    let mut stdout = tokio::io::stdout();
    let input = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    let result = tokio::select! {
        r = query_loop.run(input, &mut stdout) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    let report = query_loop.shutdown(config.shutdown_grace()).await;
    let failed = report
        .outcomes
        .iter()
        .filter(|o| !matches!(o, DispatchOutcome::Completed { .. }))
        .count();
    if failed > 0 || report.aborted > 0 {
        warn!(
            "{} tool call(s) failed, {} aborted at shutdown",
            failed, report.aborted
        );
    }
    result
}
