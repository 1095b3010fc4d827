//! ONNX regressor backed by tract (enabled with the `onnx` feature).
//!
//! The graph takes one `[1, n]` f32 input whose columns follow the stored
//! `api_features` order; the first output tensor is flattened into the result.

use anyhow::{anyhow, Result};
use std::path::Path;
use tract_onnx::prelude::*;

use crate::endpoint::FeatureTable;
use crate::provider::PredictFn;

pub struct OnnxModel {
    plan: TypedRunnableModel<TypedModel>,
    feature_names: Vec<String>,
}

impl OnnxModel {
    pub fn load(path: &Path, feature_names: Vec<String>) -> Result<Self> {
        let width = feature_names.len();
        let plan = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, width)))?
            .into_optimized()?
            .into_runnable()?;
        Ok(Self { plan, feature_names })
    }
}

impl PredictFn for OnnxModel {
    fn predict(&self, table: &FeatureTable) -> Result<Vec<f64>> {
        let row = self.feature_names
            .iter()
            .map(|name| table.get(name).map(|v| v as f32).ok_or_else(|| anyhow!("request has no column {name}")))
            .collect::<Result<Vec<f32>>>()?;
        let input = Tensor::from_shape(&[1, row.len()], &row)?;
        let outputs = self.plan.run(tvec!(input.into()))?;
        let first = outputs.first().ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = first.to_array_view::<f32>()?;
        Ok(view.iter().map(|v| *v as f64).collect())
    }

    fn feature_names(&self) -> Option<&[String]> { Some(&self.feature_names) }
}
