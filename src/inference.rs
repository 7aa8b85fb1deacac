use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::features::FeatureVector;
use crate::model::{round_to, CropModel};

/// Cut-offs applied to raw classifier output.
///
/// None of these come out of the model; they are presentation policy and
/// can be overridden in the service config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionPolicy {
    /// An alternative is flagged `suitable` when its probability exceeds this.
    pub suitable_cutoff: f64,
    pub top_k: usize,
    /// Confidence percentage at or above which the level is "excellent".
    pub excellent_at: f64,
    /// Confidence percentage at or above which the level is "good".
    pub good_at: f64,
}

impl Default for PredictionPolicy {
    fn default() -> Self {
        Self {
            suitable_cutoff: 0.15,
            top_k: 3,
            excellent_at: 90.0,
            good_at: 70.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCrop {
    pub class_index: usize,
    pub crop: String,
    pub probability: f64,
    /// `probability * 100`, two decimals.
    pub confidence: f64,
    pub suitable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub crop: String,
    pub probability: f64,
    pub confidence: f64,
    /// Every class, indexed like `CropModel::labels`.
    pub probabilities: Vec<f64>,
    /// Best `top_k` classes, most probable first.
    pub top: Vec<RankedCrop>,
}

/// Scales the reading, asks the forest for class probabilities and ranks them.
pub fn predict(
    model: &CropModel,
    features: &FeatureVector,
    policy: &PredictionPolicy,
) -> Result<Prediction, ModelError> {
    let scaled = model.scaler.transform(&features.to_array())?;
    let probabilities = model.classifier.predict_proba(&scaled)?;
    if probabilities.len() != model.labels.len() {
        return Err(ModelError::Dimension {
            got: probabilities.len(),
            expected: model.labels.len(),
        });
    }

    // Stable sort: equal probabilities keep class order.
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    let top: Vec<RankedCrop> = order
        .iter()
        .take(policy.top_k.max(1))
        .map(|&i| RankedCrop {
            class_index: i,
            crop: model.labels[i].clone(),
            probability: probabilities[i],
            confidence: round_to(probabilities[i] * 100.0, 2),
            suitable: probabilities[i] > policy.suitable_cutoff,
        })
        .collect();

    let best = top
        .first()
        .ok_or_else(|| ModelError::Inconsistent("model has no classes".into()))?;
    Ok(Prediction {
        crop: best.crop.clone(),
        probability: best.probability,
        confidence: best.confidence,
        probabilities,
        top,
    })
}
