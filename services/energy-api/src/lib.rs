//! Building energy prediction service.
//!
//! A registered model from the model store is served behind `POST /predict`;
//! request bodies are validated against the eight-field building schema first.

use anyhow::{Context, Result};
use energy_core::{clear_ready, init_tracing, load_config, mark_ready, ModelStore};
use tracing::info;

pub mod endpoint;
pub mod forest;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod provider;
pub mod routes;
pub mod schema;

pub use endpoint::{FeatureTable, ModelError, PredictError, PredictionEndpoint, PredictionResponse};
pub use provider::{ModelProvider, PredictFn, StoreModelProvider};
pub use schema::{validate, BuildingRecord, ValidationError, FEATURE_COLUMNS};

pub const SERVICE_NAME: &str = "energy-api";

/// Load config, resolve the configured model and serve until ctrl-c.
/// Failing to resolve the model is fatal.
pub async fn run() -> Result<()> {
    let cfg = load_config(SERVICE_NAME)?;
    init_tracing(&cfg.service_name, &cfg.log_level, cfg.json_log)?;
    info!(?cfg, "config loaded");

    let store = ModelStore::open(&cfg.model_store)?;
    let loaded = StoreModelProvider::new(store)
        .resolve(&cfg.model_tag)
        .with_context(|| format!("resolving model {}", cfg.model_tag))?;
    let app = routes::router(loaded.into(), cfg.body_limit_bytes);

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    mark_ready();
    info!(target: "energy-api", addr = %cfg.bind_addr, "service ready");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    clear_ready();
    info!("shutdown");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = ?e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}
