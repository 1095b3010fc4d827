//! HTTP transport: `POST /predict`, `GET /model`, plus the shared health routes.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use energy_core::{health_router, record_prediction, ModelRecord};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::endpoint::{ModelError, PredictError, PredictionEndpoint};
use crate::provider::{LoadedModel, PredictFn};
use crate::schema::ValidationError;

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub tag: String,
    pub format: String,
    pub target: String,
    pub unit: String,
    pub api_features: Vec<String>,
    pub description: String,
    pub created_at: String,
}

impl From<&ModelRecord> for ModelInfo {
    fn from(r: &ModelRecord) -> Self {
        Self {
            tag: r.tag(),
            format: r.format.as_str().to_string(),
            target: r.metadata.target.clone(),
            unit: r.metadata.unit.clone(),
            api_features: r.metadata.api_features.clone(),
            description: r.metadata.description.clone(),
            created_at: r.created_at.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    endpoint: PredictionEndpoint,
    model_info: Arc<ModelInfo>,
}

impl AppState {
    pub fn new(predict_fn: Arc<dyn PredictFn>, model_info: ModelInfo) -> Self {
        Self { endpoint: PredictionEndpoint::new(predict_fn), model_info: Arc::new(model_info) }
    }
}

impl From<LoadedModel> for AppState {
    fn from(loaded: LoadedModel) -> Self {
        let info = ModelInfo::from(&loaded.record);
        Self::new(loaded.predict_fn, info)
    }
}

pub fn router(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(predict_handler))
        .route("/model", get(model_handler))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
        .merge(health_router())
}

async fn model_handler(State(state): State<AppState>) -> Json<ModelInfo> {
    Json(state.model_info.as_ref().clone())
}

async fn predict_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let start = Instant::now();
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            record_prediction("invalid_json", start.elapsed());
            warn!(error = %e, "request body is not valid json");
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_json", "message": e.to_string()}))).into_response();
        }
    };
    let endpoint = state.endpoint.clone();
    let result = match tokio::task::spawn_blocking(move || endpoint.predict(&raw)).await {
        Ok(r) => r,
        Err(e) => Err(PredictError::Model(ModelError::Provider(format!("prediction task failed: {e}")))),
    };
    let outcome = match &result {
        Ok(_) => "ok",
        Err(PredictError::Validation(_)) => "validation_error",
        Err(PredictError::Model(_)) => "model_error",
    };
    record_prediction(outcome, start.elapsed());
    match result {
        Ok(resp) => {
            info!(prediction_kbtu = resp.prediction_kbtu, elapsed_ms = start.elapsed().as_secs_f64() * 1000.0, "prediction served");
            (StatusCode::OK, Json(resp)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn validation_body(e: &ValidationError) -> Value {
    let message = e.to_string();
    match e {
        ValidationError::Field { field, value, constraint } => json!({
            "error": "validation_error",
            "kind": "field",
            "message": message,
            "field": field,
            "value": value,
            "constraint": constraint,
        }),
        ValidationError::CrossField { fields, constraint, .. } => json!({
            "error": "validation_error",
            "kind": "cross_field",
            "message": message,
            "fields": fields,
            "constraint": constraint,
        }),
        ValidationError::NotAnObject { .. } => json!({
            "error": "validation_error",
            "kind": "body",
            "message": message,
        }),
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        match self {
            PredictError::Validation(e) => {
                warn!(error = %e, "request rejected");
                (StatusCode::UNPROCESSABLE_ENTITY, Json(validation_body(&e))).into_response()
            }
            PredictError::Model(e) => {
                error!(error = %e, "prediction failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "model_error", "message": "prediction failed"}))).into_response()
            }
        }
    }
}
