//! Epiwatch server
//!
//! Outbreak clustering and forecasting service over symptom reports.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (in-memory report table, ./data run store)
//! cargo run --release
//!
//! # Point at a config file
//! EPIWATCH_CONFIG=/etc/epiwatch.toml cargo run --release
//! ```
//!
//! # Environment Variables
//!
//! - `EPIWATCH_CONFIG`: Path to the TOML configuration file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use epiwatch::api::{create_app, AppState};
use epiwatch::config::AppConfig;
use epiwatch::ingest::remote::{HttpEmbeddingProvider, HttpSymptomInference};
use epiwatch::ingest::{
    EmbeddingProvider, LocalEmbeddingProvider, LocalSymptomInference, MemoryReportStore,
    SymptomInference,
};
use epiwatch::pipeline::ClusterPipeline;
use epiwatch::storage::RunStore;

#[derive(Parser, Debug)]
#[command(name = "epiwatch")]
#[command(about = "Outbreak clustering and forecasting service")]
#[command(version)]
struct CliArgs {
    /// Override the server bind address (default from config: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the run-store directory
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let mut config = AppConfig::load();
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        config.server.data_dir = data_dir;
    }
    config.validate().context("invalid configuration")?;

    info!(
        addr = %config.server.addr,
        data_dir = %config.server.data_dir.display(),
        eps_meters = config.engine.eps_meters,
        min_samples = config.engine.min_samples,
        "Starting epiwatch"
    );

    let store = Arc::new(
        RunStore::open(config.server.data_dir.join("runs"))
            .context("opening run store")?,
    );
    let reports = Arc::new(MemoryReportStore::new());

    let inference: Arc<dyn SymptomInference> = match &config.collaborators.inference_url {
        Some(url) => {
            info!(url = %url, "Using remote symptom inference");
            Arc::new(HttpSymptomInference::new(url.clone()).context("building inference client")?)
        }
        None => Arc::new(LocalSymptomInference),
    };
    let embedding: Arc<dyn EmbeddingProvider> = match &config.collaborators.embedding_url {
        Some(url) => {
            info!(url = %url, "Using remote embedding provider");
            Arc::new(HttpEmbeddingProvider::new(url.clone()).context("building embedding client")?)
        }
        None => Arc::new(LocalEmbeddingProvider),
    };

    let pipeline = Arc::new(ClusterPipeline::new(
        reports.clone(),
        store.clone(),
        config.engine.clone(),
    ));

    let state = AppState {
        pipeline,
        store,
        reports,
        inference,
        embedding,
        retention_runs: config.engine.retention_runs,
    };

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("binding {}", config.server.addr))?;
    info!(addr = %config.server.addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolve on ctrl-c so axum can drain in-flight requests.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install ctrl-c handler");
    }
}
