use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use spendlog::{
    config::{CliArgs, Config, ExtractionConfig, LoggingConfig},
    extraction::{DisabledExtractor, Extractor},
    server::{router, AppState},
    storage::open_storage,
    store::ExpenseStore,
};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(feature = "nl")]
fn build_extractor(config: &ExtractionConfig) -> Arc<dyn Extractor> {
    use spendlog::extraction::openai::OpenAiExtractor;

    match OpenAiExtractor::new(config) {
        Ok(extractor) => {
            tracing::info!(model = %config.model, base_url = %config.base_url, "Extraction enabled");
            Arc::new(extractor)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Extraction disabled");
            Arc::new(DisabledExtractor)
        }
    }
}

#[cfg(not(feature = "nl"))]
fn build_extractor(_config: &ExtractionConfig) -> Arc<dyn Extractor> {
    tracing::warn!("Built without the nl feature; extraction disabled");
    Arc::new(DisabledExtractor)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}

async fn serve(config: Config, state: AppState) -> Result<(), String> {
    let addr = config.listen_addr().map_err(|e| format!("invalid listen address: {}", e))?;
    let server = axum::Server::try_bind(&addr).map_err(|e| format!("cannot bind {}: {}", addr, e))?;

    tracing::info!(%addr, auth = config.auth.enabled, "API listening");
    server
        .serve(router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config.logging);

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    // The blocking PostgreSQL client drives its own runtime, so storage is
    // opened before ours starts.
    let backend = match open_storage(&config.storage) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open storage");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let state = runtime.block_on(async {
        AppState::new(
            ExpenseStore::new(backend),
            build_extractor(&config.extraction),
            config.auth.clone(),
            metrics,
        )
    });

    match runtime.block_on(serve(config, state)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
