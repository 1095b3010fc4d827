//! Building-description request schema.
//!
//! Fields are checked one by one in declaration order against an explicit rule
//! table; the first failing field is reported. The parking/total area rule runs
//! last, once both fields are individually valid.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Column names in the exact order the model expects them.
pub const FEATURE_COLUMNS: [&str; 8] = [
    "PropertyGFATotal",
    "NumberofFloors",
    "NumberofBuildings",
    "PropertyGFAParking",
    "BuildingAge",
    "FloorsPer1000GFA",
    "IsLargeBuilding",
    "NumUseTypes",
];

// Largest integer an f64 holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind { Float, Integer }

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Gt(f64),
    Ge(f64),
    /// Inclusive on both ends.
    Between(f64, f64),
}

impl Bound {
    fn holds(&self, v: f64) -> bool {
        match *self {
            Bound::Gt(lo) => v > lo,
            Bound::Ge(lo) => v >= lo,
            Bound::Between(lo, hi) => v >= lo && v <= hi,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Gt(lo) => write!(f, "> {lo}"),
            Bound::Ge(lo) => write!(f, ">= {lo}"),
            Bound::Between(lo, hi) => write!(f, ">= {lo} and <= {hi}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    Required,
    Number,
    Integer,
    Range(Bound),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Required => f.write_str("required"),
            Constraint::Number => f.write_str("number"),
            Constraint::Integer => f.write_str("integer"),
            Constraint::Range(b) => b.fmt(f),
        }
    }
}

impl Serialize for Constraint {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

fn field_message(field: &str, value: &Value, constraint: &Constraint) -> String {
    match constraint {
        Constraint::Required => format!("{field} is required"),
        Constraint::Number => format!("{field} must be a number, got {value}"),
        Constraint::Integer => format!("{field} must be an integer, got {value}"),
        Constraint::Range(b) => format!("{field} must be {b}, got {value}"),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{}", field_message(.field, .value, .constraint))]
    Field { field: &'static str, value: Value, constraint: Constraint },
    #[error("{constraint} must hold, got {parking} > {total}")]
    CrossField { fields: [&'static str; 2], constraint: &'static str, parking: f64, total: f64 },
    #[error("request body must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
}

struct FieldRule {
    name: &'static str,
    kind: Kind,
    bound: Bound,
}

const RULES: [FieldRule; 8] = [
    FieldRule { name: FEATURE_COLUMNS[0], kind: Kind::Float, bound: Bound::Gt(0.0) },
    FieldRule { name: FEATURE_COLUMNS[1], kind: Kind::Integer, bound: Bound::Gt(0.0) },
    FieldRule { name: FEATURE_COLUMNS[2], kind: Kind::Integer, bound: Bound::Gt(0.0) },
    FieldRule { name: FEATURE_COLUMNS[3], kind: Kind::Float, bound: Bound::Ge(0.0) },
    FieldRule { name: FEATURE_COLUMNS[4], kind: Kind::Integer, bound: Bound::Between(0.0, 1000.0) },
    FieldRule { name: FEATURE_COLUMNS[5], kind: Kind::Integer, bound: Bound::Gt(0.0) },
    FieldRule { name: FEATURE_COLUMNS[6], kind: Kind::Integer, bound: Bound::Between(0.0, 1.0) },
    FieldRule { name: FEATURE_COLUMNS[7], kind: Kind::Integer, bound: Bound::Between(1.0, 100.0) },
];

impl FieldRule {
    fn check(&self, raw: Option<&Value>) -> Result<f64, ValidationError> {
        let fail = |value: &Value, constraint| ValidationError::Field { field: self.name, value: value.clone(), constraint };
        let value = raw.ok_or_else(|| fail(&Value::Null, Constraint::Required))?;
        let n = value.as_f64().ok_or_else(|| fail(value, Constraint::Number))?;
        if self.kind == Kind::Integer && (n.fract() != 0.0 || n.abs() > MAX_SAFE_INTEGER) {
            return Err(fail(value, Constraint::Integer));
        }
        if !self.bound.holds(n) {
            return Err(fail(value, Constraint::Range(self.bound)));
        }
        Ok(n)
    }
}

/// A validated building description. Only obtainable through [`validate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildingRecord {
    property_gfa_total: f64,
    number_of_floors: u64,
    number_of_buildings: u64,
    property_gfa_parking: f64,
    building_age: u32,
    floors_per_1000_gfa: u64,
    is_large_building: bool,
    num_use_types: u32,
}

impl BuildingRecord {
    fn from_checked(v: [f64; 8]) -> Result<Self, ValidationError> {
        let (total, parking) = (v[0], v[3]);
        if parking > total {
            return Err(ValidationError::CrossField {
                fields: [FEATURE_COLUMNS[3], FEATURE_COLUMNS[0]],
                constraint: "PropertyGFAParking <= PropertyGFATotal",
                parking,
                total,
            });
        }
        Ok(Self {
            property_gfa_total: total,
            number_of_floors: v[1] as u64,
            number_of_buildings: v[2] as u64,
            property_gfa_parking: parking,
            building_age: v[4] as u32,
            floors_per_1000_gfa: v[5] as u64,
            is_large_building: v[6] == 1.0,
            num_use_types: v[7] as u32,
        })
    }

    pub fn property_gfa_total(&self) -> f64 { self.property_gfa_total }
    pub fn number_of_floors(&self) -> u64 { self.number_of_floors }
    pub fn number_of_buildings(&self) -> u64 { self.number_of_buildings }
    pub fn property_gfa_parking(&self) -> f64 { self.property_gfa_parking }
    pub fn building_age(&self) -> u32 { self.building_age }
    pub fn floors_per_1000_gfa(&self) -> u64 { self.floors_per_1000_gfa }
    pub fn is_large_building(&self) -> bool { self.is_large_building }
    pub fn num_use_types(&self) -> u32 { self.num_use_types }

    /// Feature values in [`FEATURE_COLUMNS`] order.
    pub fn features(&self) -> [f64; 8] {
        [
            self.property_gfa_total,
            self.number_of_floors as f64,
            self.number_of_buildings as f64,
            self.property_gfa_parking,
            self.building_age as f64,
            self.floors_per_1000_gfa as f64,
            if self.is_large_building { 1.0 } else { 0.0 },
            self.num_use_types as f64,
        ]
    }
}

impl TryFrom<&Value> for BuildingRecord {
    type Error = ValidationError;
    fn try_from(raw: &Value) -> Result<Self, Self::Error> { validate(raw) }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate an untyped request body into a [`BuildingRecord`]. Unknown keys are ignored.
pub fn validate(raw: &Value) -> Result<BuildingRecord, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject { found: json_type(raw) })?;
    for key in obj.keys().filter(|k| !FEATURE_COLUMNS.contains(&k.as_str())) {
        debug!(%key, "ignoring unknown field");
    }
    let mut values = [0.0f64; 8];
    for (slot, rule) in values.iter_mut().zip(RULES.iter()) {
        *slot = rule.check(obj.get(rule.name))?;
    }
    BuildingRecord::from_checked(values)
}
