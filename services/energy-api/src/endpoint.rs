//! Prediction endpoint: validation, feature-table assembly, model call, response shaping.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::provider::PredictFn;
use crate::schema::{validate, BuildingRecord, ValidationError, FEATURE_COLUMNS};

pub const TARGET: &str = "SiteEnergyUse_clipped";
pub const UNIT: &str = "kBtu";

/// Single-row table handed to the model, columns in [`FEATURE_COLUMNS`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    row: [f64; 8],
}

impl FeatureTable {
    pub fn from_record(record: &BuildingRecord) -> Self { Self { row: record.features() } }

    pub fn columns(&self) -> &'static [&'static str] { &FEATURE_COLUMNS }
    pub fn row(&self) -> &[f64] { &self.row }
    pub fn rows(&self) -> usize { 1 }

    pub fn get(&self, column: &str) -> Option<f64> {
        FEATURE_COLUMNS.iter().position(|c| *c == column).map(|i| self.row[i])
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("unexpected model output shape: expected 1 value, got {rows}")]
    OutputShape { rows: usize },
    #[error("unexpected model output: non-finite value {value}")]
    NonFinite { value: f64 },
    #[error("model features {declared:?} do not match request columns")]
    FeatureMismatch { declared: Vec<String> },
    #[error("model provider failed: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResponse {
    #[serde(rename = "prediction_kBtu")]
    pub prediction_kbtu: f64,
    pub target: &'static str,
    pub unit: &'static str,
}

impl PredictionResponse {
    fn new(prediction_kbtu: f64) -> Self { Self { prediction_kbtu, target: TARGET, unit: UNIT } }
}

#[derive(Clone)]
pub struct PredictionEndpoint {
    model: Arc<dyn PredictFn>,
}

impl PredictionEndpoint {
    pub fn new(model: Arc<dyn PredictFn>) -> Self { Self { model } }

    /// Never panics on bad input; every failure comes back as a [`PredictError`].
    pub fn predict(&self, raw: &Value) -> Result<PredictionResponse, PredictError> {
        let record = validate(raw)?;
        let table = FeatureTable::from_record(&record);
        Ok(self.predict_table(&table)?)
    }

    fn predict_table(&self, table: &FeatureTable) -> Result<PredictionResponse, ModelError> {
        if let Some(declared) = self.model.feature_names() {
            let matches = declared.len() == table.columns().len()
                && table.columns().iter().all(|c| declared.iter().any(|d| d == c));
            if !matches {
                return Err(ModelError::FeatureMismatch { declared: declared.to_vec() });
            }
        }
        let output = self.model.predict(table).map_err(|e| ModelError::Provider(format!("{e:#}")))?;
        let value = match output.as_slice() {
            [v] => *v,
            _ => return Err(ModelError::OutputShape { rows: output.len() }),
        };
        if !value.is_finite() {
            return Err(ModelError::NonFinite { value });
        }
        let value = if value < 0.0 {
            warn!(value, "negative model output clipped to zero");
            0.0
        } else {
            value
        };
        debug!(prediction_kbtu = value, "prediction computed");
        Ok(PredictionResponse::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Fixed(Vec<f64>);
    impl PredictFn for Fixed {
        fn predict(&self, _table: &FeatureTable) -> anyhow::Result<Vec<f64>> { Ok(self.0.clone()) }
    }

    /// Records the table it was called with.
    #[derive(Default)]
    struct Capture(Mutex<Option<FeatureTable>>);
    impl PredictFn for Capture {
        fn predict(&self, table: &FeatureTable) -> anyhow::Result<Vec<f64>> {
            *self.0.lock().unwrap() = Some(table.clone());
            Ok(vec![table.row().iter().sum()])
        }
    }

    struct Named(Vec<String>);
    impl PredictFn for Named {
        fn predict(&self, _table: &FeatureTable) -> anyhow::Result<Vec<f64>> { Ok(vec![1.0]) }
        fn feature_names(&self) -> Option<&[String]> { Some(&self.0) }
    }

    struct Failing;
    impl PredictFn for Failing {
        fn predict(&self, _table: &FeatureTable) -> anyhow::Result<Vec<f64>> { anyhow::bail!("runner unavailable") }
    }

    fn scenario_a() -> Value {
        json!({
            "PropertyGFATotal": 50000, "NumberofFloors": 5, "NumberofBuildings": 1,
            "PropertyGFAParking": 2000, "BuildingAge": 30, "FloorsPer1000GFA": 3,
            "IsLargeBuilding": 1, "NumUseTypes": 2
        })
    }

    fn endpoint(model: impl PredictFn + 'static) -> PredictionEndpoint { PredictionEndpoint::new(Arc::new(model)) }

    #[test]
    fn scenario_a_predicts() {
        let capture = Arc::new(Capture::default());
        let ep = PredictionEndpoint::new(capture.clone());
        let resp = ep.predict(&scenario_a()).unwrap();
        assert_eq!(resp.target, "SiteEnergyUse_clipped");
        assert_eq!(resp.unit, "kBtu");
        assert_eq!(resp.prediction_kbtu, 52042.0);

        let table = capture.0.lock().unwrap().clone().unwrap();
        assert_eq!(table.columns(), &FEATURE_COLUMNS);
        assert_eq!(table.rows(), 1);
        assert_eq!(table.row(), &[50000.0, 5.0, 1.0, 2000.0, 30.0, 3.0, 1.0, 2.0]);
        assert_eq!(table.get("BuildingAge"), Some(30.0));
        assert_eq!(table.get("Unknown"), None);
    }

    #[test]
    fn validation_errors_pass_through() {
        let mut raw = scenario_a();
        raw["NumberofFloors"] = json!(0);
        match endpoint(Fixed(vec![1.0])).predict(&raw) {
            Err(PredictError::Validation(ValidationError::Field { field, .. })) => assert_eq!(field, "NumberofFloors"),
            other => panic!("unexpected {other:?}"),
        }
        raw = scenario_a();
        raw["PropertyGFAParking"] = json!(60000);
        assert!(matches!(endpoint(Fixed(vec![1.0])).predict(&raw), Err(PredictError::Validation(ValidationError::CrossField { .. }))));
    }

    #[test]
    fn scenario_d_empty_output_is_model_error() {
        let err = endpoint(Fixed(vec![])).predict(&scenario_a()).unwrap_err();
        assert_eq!(err, PredictError::Model(ModelError::OutputShape { rows: 0 }));
        assert!(err.to_string().starts_with("unexpected model output shape"));
    }

    #[test]
    fn multi_row_and_non_finite_outputs_rejected() {
        assert_eq!(endpoint(Fixed(vec![1.0, 2.0])).predict(&scenario_a()).unwrap_err(), PredictError::Model(ModelError::OutputShape { rows: 2 }));
        assert!(matches!(endpoint(Fixed(vec![f64::NAN])).predict(&scenario_a()), Err(PredictError::Model(ModelError::NonFinite { .. }))));
        assert!(matches!(endpoint(Fixed(vec![f64::INFINITY])).predict(&scenario_a()), Err(PredictError::Model(ModelError::NonFinite { .. }))));
    }

    #[test]
    fn provider_failure_is_model_error() {
        match endpoint(Failing).predict(&scenario_a()) {
            Err(PredictError::Model(ModelError::Provider(reason))) => assert!(reason.contains("runner unavailable")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negative_output_clipped() {
        assert_eq!(endpoint(Fixed(vec![-12.5])).predict(&scenario_a()).unwrap().prediction_kbtu, 0.0);
    }

    #[test]
    fn declared_features_checked() {
        let mut shuffled: Vec<String> = FEATURE_COLUMNS.iter().rev().map(|s| s.to_string()).collect();
        assert!(endpoint(Named(shuffled.clone())).predict(&scenario_a()).is_ok());
        shuffled[0] = "SiteEUI".into();
        assert!(matches!(endpoint(Named(shuffled)).predict(&scenario_a()), Err(PredictError::Model(ModelError::FeatureMismatch { .. }))));
    }

    #[test]
    fn idempotent_for_identical_input() {
        let ep = endpoint(Capture::default());
        assert_eq!(ep.predict(&scenario_a()).unwrap(), ep.predict(&scenario_a()).unwrap());
    }

    #[test]
    fn response_json_has_exactly_three_keys() {
        let resp = endpoint(Fixed(vec![123456.5])).predict(&scenario_a()).unwrap();
        let parsed: Value = serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
        let obj = parsed.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
        keys.sort();
        assert_eq!(keys, ["prediction_kBtu", "target", "unit"]);
        assert_eq!(obj["prediction_kBtu"], json!(123456.5));
        assert_eq!(obj["target"], json!("SiteEnergyUse_clipped"));
        assert_eq!(obj["unit"], json!("kBtu"));
    }
}
