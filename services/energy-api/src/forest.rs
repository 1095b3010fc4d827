//! Tree-ensemble regressor loaded from JSON.
//!
//! Each tree uses the parallel-array layout scikit-learn exposes on `tree_`:
//! `children_left`, `children_right`, `feature`, `threshold` and `value`, where a
//! node is a leaf when both children are `-1`. Splits send `x <= threshold` left.
//! `value` holds one number per node (single-output regression).
//!
//! Columns are looked up by name, so the model's own feature order may differ from
//! the request schema's.

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::endpoint::FeatureTable;
use crate::provider::PredictFn;

const LEAF: i64 = -1;

#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    #[error("invalid forest json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("forest has no trees")]
    NoTrees,
    #[error("forest declares no feature names")]
    NoFeatureNames,
    #[error("tree {tree}: {reason}")]
    Malformed { tree: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregation {
    /// Random forest: average of tree outputs.
    #[default]
    Mean,
    /// Gradient boosting: `base_score + learning_rate * sum`.
    Sum { base_score: f64, learning_rate: f64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    children_left: Vec<i64>,
    children_right: Vec<i64>,
    feature: Vec<i64>,
    threshold: Vec<f64>,
    value: Vec<f64>,
}

impl Tree {
    fn check(&self, n_features: usize) -> std::result::Result<(), String> {
        let n = self.children_left.len();
        if n == 0 { return Err("no nodes".into()); }
        if [self.children_right.len(), self.feature.len(), self.threshold.len(), self.value.len()].iter().any(|l| *l != n) {
            return Err("node arrays differ in length".into());
        }
        for node in 0..n {
            let (l, r) = (self.children_left[node], self.children_right[node]);
            if l == LEAF && r == LEAF { continue; }
            // children always come after their parent, so traversal terminates
            for child in [l, r] {
                if child <= node as i64 || child >= n as i64 {
                    return Err(format!("node {node} has invalid child {child}"));
                }
            }
            let f = self.feature[node];
            if f < 0 || f as usize >= n_features {
                return Err(format!("node {node} splits on unknown feature {f}"));
            }
        }
        Ok(())
    }

    fn eval(&self, row: &[f64]) -> f64 {
        let mut node = 0usize;
        while self.children_left[node] != LEAF {
            node = if row[self.feature[node] as usize] <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        self.value[node]
    }
}

#[derive(Deserialize)]
struct ForestFile {
    #[serde(default)]
    feature_names: Option<Vec<String>>,
    #[serde(default)]
    aggregation: Aggregation,
    trees: Vec<Tree>,
}

#[derive(Debug, Clone)]
pub struct ForestModel {
    feature_names: Vec<String>,
    aggregation: Aggregation,
    trees: Vec<Tree>,
}

impl ForestModel {
    /// Parse and check a forest. `fallback_names` is used when the file carries no `feature_names`.
    pub fn from_slice(bytes: &[u8], fallback_names: &[String]) -> Result<Self, ForestError> {
        let file: ForestFile = serde_json::from_slice(bytes)?;
        let feature_names = file.feature_names.unwrap_or_else(|| fallback_names.to_vec());
        if feature_names.is_empty() { return Err(ForestError::NoFeatureNames); }
        if file.trees.is_empty() { return Err(ForestError::NoTrees); }
        for (i, tree) in file.trees.iter().enumerate() {
            tree.check(feature_names.len()).map_err(|reason| ForestError::Malformed { tree: i, reason })?;
        }
        Ok(Self { feature_names, aggregation: file.aggregation, trees: file.trees })
    }

    pub fn n_trees(&self) -> usize { self.trees.len() }

    /// Predict one row laid out in this model's feature order.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.eval(row)).sum();
        match self.aggregation {
            Aggregation::Mean => sum / self.trees.len() as f64,
            Aggregation::Sum { base_score, learning_rate } => base_score + learning_rate * sum,
        }
    }
}

impl PredictFn for ForestModel {
    fn predict(&self, table: &FeatureTable) -> Result<Vec<f64>> {
        let row = self.feature_names
            .iter()
            .map(|name| table.get(name).ok_or_else(|| anyhow!("request has no column {name}")))
            .collect::<Result<Vec<f64>>>()?;
        Ok(vec![self.predict_row(&row)])
    }

    fn feature_names(&self) -> Option<&[String]> { Some(&self.feature_names) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::validate;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> { list.iter().map(|s| s.to_string()).collect() }

    // x0 <= 10 -> 1.0, else (x1 <= 0.5 -> 2.0, else 3.0)
    fn stump_json(aggregation: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "feature_names": ["a", "b"],
            "aggregation": aggregation,
            "trees": [
                {"children_left": [1, -1, 3, -1, -1], "children_right": [2, -1, 4, -1, -1],
                 "feature": [0, -2, 1, -2, -2], "threshold": [10.0, -2.0, 0.5, -2.0, -2.0],
                 "value": [0.0, 1.0, 0.0, 2.0, 3.0]},
                {"children_left": [-1], "children_right": [-1], "feature": [-2], "threshold": [-2.0], "value": [5.0]}
            ]
        })).unwrap()
    }

    #[test]
    fn mean_aggregation_walks_trees() {
        let f = ForestModel::from_slice(&stump_json(json!({"kind": "mean"})), &[]).unwrap();
        assert_eq!(f.n_trees(), 2);
        assert_eq!(f.predict_row(&[10.0, 0.0]), 3.0);
        assert_eq!(f.predict_row(&[11.0, 0.5]), 3.5);
        assert_eq!(f.predict_row(&[11.0, 0.6]), 4.0);
    }

    #[test]
    fn sum_aggregation() {
        let f = ForestModel::from_slice(&stump_json(json!({"kind": "sum", "base_score": 100.0, "learning_rate": 0.1})), &[]).unwrap();
        assert!((f.predict_row(&[0.0, 0.0]) - 100.6).abs() < 1e-9);
    }

    #[test]
    fn malformed_forests_rejected() {
        assert!(matches!(ForestModel::from_slice(b"not json", &[]), Err(ForestError::Parse(_))));
        assert!(matches!(ForestModel::from_slice(br#"{"feature_names":["a"],"trees":[]}"#, &[]), Err(ForestError::NoTrees)));
        let no_names = br#"{"trees":[{"children_left":[-1],"children_right":[-1],"feature":[-2],"threshold":[-2.0],"value":[1.0]}]}"#;
        assert!(matches!(ForestModel::from_slice(no_names, &[]), Err(ForestError::NoFeatureNames)));
        assert!(ForestModel::from_slice(no_names, &names(&["a"])).is_ok());

        let cyclic = br#"{"feature_names":["a"],"trees":[{"children_left":[0],"children_right":[0],"feature":[0],"threshold":[1.0],"value":[1.0]}]}"#;
        assert!(matches!(ForestModel::from_slice(cyclic, &[]), Err(ForestError::Malformed { tree: 0, .. })));
        let bad_feature = br#"{"feature_names":["a"],"trees":[{"children_left":[1,-1,-1],"children_right":[2,-1,-1],"feature":[3,-2,-2],"threshold":[1.0,0,0],"value":[0,1,2]}]}"#;
        assert!(matches!(ForestModel::from_slice(bad_feature, &[]), Err(ForestError::Malformed { .. })));
        let ragged = br#"{"feature_names":["a"],"trees":[{"children_left":[-1],"children_right":[-1,-1],"feature":[-2],"threshold":[0],"value":[1]}]}"#;
        assert!(matches!(ForestModel::from_slice(ragged, &[]), Err(ForestError::Malformed { .. })));
    }

    #[test]
    fn columns_mapped_by_name() {
        // splits on BuildingAge, declared first although it is the fifth request column
        let forest = json!({
            "feature_names": ["BuildingAge", "PropertyGFATotal"],
            "trees": [{"children_left": [1, -1, -1], "children_right": [2, -1, -1],
                       "feature": [0, -2, -2], "threshold": [50.0, -2.0, -2.0], "value": [0.0, 10.0, 20.0]}]
        });
        let f = ForestModel::from_slice(&serde_json::to_vec(&forest).unwrap(), &[]).unwrap();
        let mut raw = json!({
            "PropertyGFATotal": 50000, "NumberofFloors": 5, "NumberofBuildings": 1,
            "PropertyGFAParking": 2000, "BuildingAge": 30, "FloorsPer1000GFA": 3,
            "IsLargeBuilding": 1, "NumUseTypes": 2
        });
        let table = FeatureTable::from_record(&validate(&raw).unwrap());
        assert_eq!(f.predict(&table).unwrap(), vec![10.0]);
        raw["BuildingAge"] = json!(80);
        let table = FeatureTable::from_record(&validate(&raw).unwrap());
        assert_eq!(f.predict(&table).unwrap(), vec![20.0]);
    }

    #[test]
    fn unknown_model_column_is_an_error() {
        let forest = br#"{"feature_names":["SiteEUI"],"trees":[{"children_left":[-1],"children_right":[-1],"feature":[-2],"threshold":[-2.0],"value":[1.0]}]}"#;
        let f = ForestModel::from_slice(forest, &[]).unwrap();
        let raw = json!({
            "PropertyGFATotal": 50000, "NumberofFloors": 5, "NumberofBuildings": 1,
            "PropertyGFAParking": 2000, "BuildingAge": 30, "FloorsPer1000GFA": 3,
            "IsLargeBuilding": 1, "NumUseTypes": 2
        });
        let table = FeatureTable::from_record(&validate(&raw).unwrap());
        assert!(f.predict(&table).is_err());
    }
}
