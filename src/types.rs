use serde::Serialize;
use std::collections::BTreeMap;

use crate::explain::{Explanation, FeatureWeight};
use crate::features::{FeatureSpec, FeatureVector, RangeWarning};
use crate::model::TrainingReport;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub model: &'static str,
    pub model_loaded: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub success: bool,
    pub model_type: &'static str,
    pub algorithm: &'static str,
    pub purpose: &'static str,
    pub accuracy: f64,
    pub feature_names: Vec<&'static str>,
    pub feature_descriptions: BTreeMap<&'static str, &'static str>,
    pub n_crops: usize,
    pub crops: Vec<String>,
    pub n_estimators: usize,
    pub total_samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub trained_at: String,
}

#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(flatten)]
    pub report: TrainingReport,
}

#[derive(Debug, Serialize)]
pub struct CropsResponse {
    pub success: bool,
    pub crops: Vec<String>,
    pub total_crops: usize,
}

#[derive(Debug, Serialize)]
pub struct FeaturesResponse {
    pub success: bool,
    pub required_fields: Vec<&'static str>,
    pub feature_ranges: BTreeMap<&'static str, FeatureSpec>,
    pub sample_input: FeatureVector,
}

/// One entry of `top_recommendations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub crop: String,
    pub confidence: f64,
    pub suitable: bool,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub recommended_crop: String,
    pub confidence: f64,
    pub top_recommendations: Vec<Recommendation>,
    pub explanation: Explanation,
    pub feature_importance: BTreeMap<&'static str, f64>,
    pub importance_ranking: Vec<FeatureWeight>,
    pub most_important_factor: FeatureWeight,
    pub input_conditions: FeatureVector,
    pub range_warnings: Vec<RangeWarning>,
    pub timestamp: String,
}
