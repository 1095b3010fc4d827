//! Model provider: resolves a registry key to a callable prediction function.

use anyhow::{bail, Context, Result};
use energy_core::{ModelFormat, ModelMetadata, ModelRecord, ModelStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::endpoint::{FeatureTable, TARGET, UNIT};
use crate::forest::ForestModel;
use crate::schema::FEATURE_COLUMNS;

/// A loaded model. Implementations are shared across requests and must be safe to call concurrently.
pub trait PredictFn: Send + Sync {
    fn predict(&self, table: &FeatureTable) -> Result<Vec<f64>>;

    /// Input columns the model was trained on, in the model's own order.
    fn feature_names(&self) -> Option<&[String]> { None }
}

pub trait ModelProvider {
    fn get_predict_fn(&self, registry_key: &str) -> Result<Arc<dyn PredictFn>>;
}

pub struct LoadedModel {
    pub record: ModelRecord,
    pub predict_fn: Arc<dyn PredictFn>,
}

pub struct StoreModelProvider {
    store: ModelStore,
}

impl StoreModelProvider {
    pub fn new(store: ModelStore) -> Self { Self { store } }

    pub fn resolve(&self, registry_key: &str) -> Result<LoadedModel> {
        let record = self.store.get(registry_key)?;
        let bytes = self.store.verify_artifact(&record)?;
        let path = self.store.artifact_path(&record);
        let predict_fn = load_artifact(&bytes, &path, record.format, &record.metadata)
            .with_context(|| format!("loading model {}", record.tag()))?;
        info!(tag = %record.tag(), format = record.format.as_str(), "model loaded");
        Ok(LoadedModel { record, predict_fn })
    }
}

impl ModelProvider for StoreModelProvider {
    fn get_predict_fn(&self, registry_key: &str) -> Result<Arc<dyn PredictFn>> {
        Ok(self.resolve(registry_key)?.predict_fn)
    }
}

/// Metadata stored alongside the energy model when it is registered.
pub fn default_metadata() -> ModelMetadata {
    ModelMetadata {
        target: TARGET.to_string(),
        unit: UNIT.to_string(),
        api_features: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        description: "Random forest predicting the site energy use of non-residential Seattle buildings (8 columns)".to_string(),
    }
}

/// Same columns as the request schema, in any order.
fn is_schema_feature_set(names: &[String]) -> bool {
    let mut declared: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    let mut expected = FEATURE_COLUMNS.to_vec();
    declared.sort_unstable();
    expected.sort_unstable();
    declared == expected
}

fn check_metadata(metadata: &ModelMetadata) -> Result<()> {
    if !is_schema_feature_set(&metadata.api_features) {
        bail!("model declares features {:?}, expected {:?}", metadata.api_features, FEATURE_COLUMNS);
    }
    if metadata.target != TARGET || metadata.unit != UNIT {
        warn!(target_name = %metadata.target, unit = %metadata.unit, "model metadata differs from response constants");
    }
    Ok(())
}

/// Build a predict function from artifact bytes. `path` is only read by formats that load from disk.
pub fn load_artifact(bytes: &[u8], path: &Path, format: ModelFormat, metadata: &ModelMetadata) -> Result<Arc<dyn PredictFn>> {
    check_metadata(metadata)?;
    let predict_fn: Arc<dyn PredictFn> = match format {
        ModelFormat::ForestJson => Arc::new(ForestModel::from_slice(bytes, &metadata.api_features)?),
        ModelFormat::Onnx => load_onnx(path, metadata)?,
    };
    if let Some(names) = predict_fn.feature_names() {
        if !is_schema_feature_set(names) {
            bail!("model artifact reads features {:?}, expected {:?}", names, FEATURE_COLUMNS);
        }
    }
    Ok(predict_fn)
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path, metadata: &ModelMetadata) -> Result<Arc<dyn PredictFn>> {
    Ok(Arc::new(crate::onnx::OnnxModel::load(path, metadata.api_features.clone())?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path, _metadata: &ModelMetadata) -> Result<Arc<dyn PredictFn>> {
    Err(anyhow::anyhow!("{} is an onnx model but this build has no onnx support (enable the `onnx` feature)", path.display()))
}
