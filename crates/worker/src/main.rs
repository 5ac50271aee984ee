use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshforge_core::work_item::load_manifest;
use meshforge_meshy::MeshyApi;
use meshforge_pipeline::ledger::LedgerStore;
use meshforge_pipeline::orchestrator::Orchestrator;
use meshforge_pipeline::summary::RunSummary;
use meshforge_worker::config::WorkerConfig;

/// Exit code for configuration, manifest and ledger errors.
const EXIT_FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    // LOG_FORMAT=json switches to one JSON object per event.
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "meshforge_worker=info,meshforge_pipeline=info,meshforge_meshy=info".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    match run().await {
        Ok(summary) => ExitCode::from(summary.exit_code() as u8),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Run aborted");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run() -> anyhow::Result<RunSummary> {
    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        base_url = %config.meshy.base_url,
        manifest = %config.manifest_path.display(),
        ledger = %config.ledger_path.display(),
        assets_root = %config.pipeline.assets_root.display(),
        format = config.pipeline.artifact_format.as_str(),
        "Loaded worker configuration",
    );

    // --- Manifest ---
    let items = load_manifest(&config.manifest_path).context("Failed to load asset manifest")?;
    tracing::info!(count = items.len(), "Manifest loaded");

    // --- Runner & ledger ---
    let api = Arc::new(MeshyApi::new(config.meshy.clone()));
    let store = LedgerStore::new(&config.ledger_path).with_retry(
        config.pipeline.ledger_save_attempts,
        config.pipeline.ledger_retry_delay,
    );

    let orchestrator = Orchestrator::new(api, items, store, config.pipeline.clone())
        .context("Invalid pipeline configuration")?;
    let summary = orchestrator.run().await.context("Pipeline run aborted")?;
    Ok(summary)
}
