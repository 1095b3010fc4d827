//! Core shared utilities for the building energy services.

use anyhow::{Context, Result};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use once_cell::sync::OnceCell;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static NODE_READINESS: AtomicBool = AtomicBool::new(false);

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn is_ready() -> bool { NODE_READINESS.load(Ordering::SeqCst) }

/// Install the global subscriber. `RUST_LOG` wins over `log_level`; JSON output is
/// selected by `json` or `ENERGY_JSON_LOG=1`. Calling it twice is a no-op.
pub fn init_tracing(service: &str, log_level: &str, json: bool) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(log_level))
            .context("invalid log filter")?;
        let json = json || std::env::var("ENERGY_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry
                .with(tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false))
                .try_init()?;
        } else {
            registry
                .with(tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_line_number(true))
                .try_init()?;
        }
        Ok(())
    })?;
    info!(target: "energy-core", service, "tracing initialized");
    Ok(())
}

/// Liveness, readiness and Prometheus exposition routes, merged into every service router.
pub fn health_router() -> Router {
    Router::new()
        .route("/live", get(|| async { axum::Json(serde_json::json!({"live": true})) }))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
}

async fn ready_handler() -> Response {
    let ready = is_ready();
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, axum::Json(serde_json::json!({"ready": ready}))).into_response()
}

async fn metrics_handler() -> Response {
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response();
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf).into_response()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub bind_addr: SocketAddr,
    pub model_store: PathBuf,
    pub model_tag: String,
    pub log_level: String,
    pub json_log: bool,
    pub body_limit_bytes: usize,
}

/// Layered config: built-in defaults, then the file named by `ENERGY_CONFIG_FILE`,
/// then `ENERGY__*` environment variables.
pub fn load_config(service: &str) -> Result<ServiceConfig> {
    let mut builder = config::Config::builder()
        .set_default("service_name", service)?
        .set_default("bind_addr", "0.0.0.0:3000")?
        .set_default("model_store", "./model_store")?
        .set_default("model_tag", "seattle_energy_model_8cols:latest")?
        .set_default("log_level", "info")?
        .set_default("json_log", false)?
        .set_default("body_limit_bytes", 64 * 1024)?;

    if let Ok(file) = std::env::var("ENERGY_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("ENERGY").separator("__").try_parsing(true));
    let cfg = builder.build().context("building configuration")?;
    let service_cfg: ServiceConfig = cfg.try_deserialize().context("deserializing configuration")?;
    Ok(service_cfg)
}

pub mod model_registry;
pub mod metrics;

pub use model_registry::{ModelFormat, ModelMetadata, ModelRecord, ModelStore, ModelTag, RegistryError};
pub use metrics::{record_prediction, PredictionMetrics, PREDICTION_METRICS};
