//! The seven soil/climate inputs and their validation.
//!
//! Order matters: [`FEATURE_NAMES`] is the column order used for training,
//! scaling and inference. Vectors are always built from named fields, never
//! from the iteration order of an incoming JSON object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

pub const N_FEATURES: usize = 7;

pub const FEATURE_NAMES: [&str; N_FEATURES] =
    ["N", "P", "K", "temperature", "humidity", "ph", "rainfall"];

/// Declared domain of one input.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FeatureSpec {
    #[serde(skip)]
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub description: &'static str,
}

pub const FEATURES: [FeatureSpec; N_FEATURES] = [
    FeatureSpec {
        name: "N",
        min: 0.0,
        max: 140.0,
        description: "Nitrogen content ratio in soil (kg/ha)",
    },
    FeatureSpec {
        name: "P",
        min: 5.0,
        max: 145.0,
        description: "Phosphorus content ratio in soil (kg/ha)",
    },
    FeatureSpec {
        name: "K",
        min: 5.0,
        max: 205.0,
        description: "Potassium content ratio in soil (kg/ha)",
    },
    FeatureSpec {
        name: "temperature",
        min: 8.0,
        max: 44.0,
        description: "Temperature in Celsius",
    },
    FeatureSpec {
        name: "humidity",
        min: 14.0,
        max: 100.0,
        description: "Relative humidity in %",
    },
    FeatureSpec {
        name: "ph",
        min: 3.5,
        max: 9.9,
        description: "pH value of the soil",
    },
    FeatureSpec {
        name: "rainfall",
        min: 20.0,
        max: 300.0,
        description: "Rainfall in mm",
    },
];

impl FeatureSpec {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// One validated set of readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(rename = "N")]
    pub n: f64,
    #[serde(rename = "P")]
    pub p: f64,
    #[serde(rename = "K")]
    pub k: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub ph: f64,
    pub rainfall: f64,
}

impl FeatureVector {
    pub fn from_array(v: [f64; N_FEATURES]) -> Self {
        Self {
            n: v[0],
            p: v[1],
            k: v[2],
            temperature: v[3],
            humidity: v[4],
            ph: v[5],
            rainfall: v[6],
        }
    }

    /// Values in training order.
    pub fn to_array(&self) -> [f64; N_FEATURES] {
        [
            self.n,
            self.p,
            self.k,
            self.temperature,
            self.humidity,
            self.ph,
            self.rainfall,
        ]
    }

    /// The sample reading used by the frontend's "try it" button.
    pub fn sample() -> Self {
        Self::from_array([90.0, 42.0, 43.0, 20.87, 82.0, 6.5, 202.93])
    }
}

/// A reading outside its declared domain. Advisory unless ranges are enforced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeWarning {
    pub feature: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone)]
pub struct Validated {
    pub features: FeatureVector,
    pub warnings: Vec<RangeWarning>,
}

/// Turns a raw JSON body into a [`FeatureVector`].
///
/// Numbers and numeric strings are accepted. Fields are checked in training
/// order so the first failing field is reported. With `enforce_ranges` an
/// out-of-range value is an error, otherwise it becomes a [`RangeWarning`].
pub fn validate(body: &Value, enforce_ranges: bool) -> Result<Validated, ValidationError> {
    let map = body.as_object().ok_or(ValidationError::NotAnObject)?;

    let mut values = [0.0; N_FEATURES];
    let mut warnings = Vec::new();
    for (slot, spec) in values.iter_mut().zip(FEATURES.iter()) {
        let value = read_field(map, spec.name)?;
        if !spec.contains(value) {
            if enforce_ranges {
                return Err(ValidationError::OutOfRange {
                    field: spec.name,
                    value,
                    min: spec.min,
                    max: spec.max,
                });
            }
            warnings.push(RangeWarning {
                feature: spec.name,
                value,
                min: spec.min,
                max: spec.max,
            });
        }
        *slot = value;
    }

    Ok(Validated {
        features: FeatureVector::from_array(values),
        warnings,
    })
}

fn read_field(map: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    let raw = map.get(field).ok_or(ValidationError::Missing { field })?;
    let value = match raw {
        Value::Number(n) => n.as_f64().ok_or_else(|| ValidationError::NotNumeric {
            field,
            raw: n.to_string(),
        })?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::NotNumeric {
                field,
                raw: s.clone(),
            })?,
        Value::Null => return Err(ValidationError::Missing { field }),
        other => {
            return Err(ValidationError::NotNumeric {
                field,
                raw: other.to_string(),
            })
        }
    };
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field });
    }
    Ok(value)
}
