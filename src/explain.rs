//! Human-readable rationale for a prediction.
//!
//! Two independent sources are combined here. Feature importances are a
//! property of the trained forest and identical for every request. The
//! condition notes are fixed rules of thumb on the raw reading; they are not
//! derived from the model and say nothing about its decision boundary.

use serde::Serialize;

use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::inference::PredictionPolicy;
use crate::model::CropModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Excellent,
    Good,
    Low,
}

impl ConfidenceLevel {
    /// Buckets a confidence percentage using the policy thresholds.
    pub fn from_confidence(confidence: f64, policy: &PredictionPolicy) -> Self {
        if confidence >= policy.excellent_at {
            ConfidenceLevel::Excellent
        } else if confidence >= policy.good_at {
            ConfidenceLevel::Good
        } else {
            ConfidenceLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub crop_info: String,
    pub conditions_analysis: Vec<String>,
    pub confidence_level: ConfidenceLevel,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureWeight {
    pub feature: &'static str,
    pub importance: f64,
}

/// Static agronomy notes for the crops people ask about most.
pub fn crop_info(crop: &str) -> String {
    let text = match crop {
        "rice" => "Rice thrives in high humidity and adequate rainfall with moderate NPK levels. Best grown in flooded fields.",
        "wheat" => "Wheat grows well in moderate temperatures with balanced soil nutrients. Requires well-drained soil.",
        "maize" => "Maize (corn) requires warm temperatures and moderate to high nitrogen levels. Needs good drainage.",
        "cotton" => "Cotton needs warm temperatures, moderate rainfall, and well-drained soil. Requires careful irrigation.",
        "sugarcane" => "Sugarcane thrives in high temperatures, humidity, and rich soil conditions. Needs consistent moisture.",
        "coffee" => "Coffee requires moderate temperatures, high humidity, and acidic to neutral soil. Shade-tolerant crop.",
        "banana" => "Bananas need warm temperatures, high humidity, and potassium-rich soil. Requires year-round warmth.",
        "grapes" => "Grapes prefer moderate temperatures, low to moderate rainfall, and well-drained soil. Needs dry climate.",
        "apple" => "Apples grow best in cool to moderate temperatures with balanced soil nutrients. Needs winter chill.",
        "orange" => "Oranges require warm temperatures, moderate humidity, and slightly acidic soil. Frost-sensitive.",
        "coconut" => "Coconut palms need warm temperatures, high humidity, and sandy soil. Grows well in coastal areas.",
        "jute" => "Jute requires warm, humid climate with plenty of rainfall. Grows well in alluvial soil.",
        "mango" => "Mangoes need warm to hot temperatures with moderate rainfall. Prefers well-drained sandy loam.",
        "papaya" => "Papaya requires warm temperatures, good drainage, and rich organic soil. Fast-growing fruit tree.",
        "pomegranate" => "Pomegranate thrives in hot, dry climates with good drainage. Drought-tolerant once established.",
        other => return format!("{} is suitable for the provided conditions.", other),
    };
    text.to_string()
}

/// Threshold notes on the unscaled reading. At most one note per measurement.
pub fn analyze_conditions(f: &FeatureVector) -> Vec<String> {
    let mut notes = Vec::new();

    if f.temperature > 30.0 {
        notes.push("High temperature favors warm-season crops");
    } else if f.temperature < 15.0 {
        notes.push("Cool temperature suits cold-season crops");
    }

    if f.humidity > 80.0 {
        notes.push("High humidity suitable for moisture-loving crops");
    } else if f.humidity < 50.0 {
        notes.push("Low humidity requires drought-tolerant crops");
    }

    if f.rainfall > 200.0 {
        notes.push("High rainfall supports water-intensive crops");
    } else if f.rainfall < 100.0 {
        notes.push("Low rainfall requires drought-resistant crops");
    }

    if f.ph < 6.0 {
        notes.push("Acidic soil - some crops may need pH adjustment");
    } else if f.ph > 8.0 {
        notes.push("Alkaline soil - may need pH correction");
    }

    notes.into_iter().map(String::from).collect()
}

pub fn explain(
    crop: &str,
    confidence: f64,
    features: &FeatureVector,
    policy: &PredictionPolicy,
) -> Explanation {
    Explanation {
        crop_info: crop_info(crop),
        conditions_analysis: analyze_conditions(features),
        confidence_level: ConfidenceLevel::from_confidence(confidence, policy),
        recommendation: format!(
            "Based on your soil and climate conditions, {} is the most suitable crop \
             with {:.1}% confidence.",
            crop, confidence
        ),
    }
}

/// Model-level importances, most important first. Ties keep training order.
pub fn importance_ranking(model: &CropModel) -> Vec<FeatureWeight> {
    let mut ranking: Vec<FeatureWeight> = FEATURE_NAMES
        .iter()
        .zip(model.classifier.feature_importances())
        .map(|(&feature, &importance)| FeatureWeight {
            feature,
            importance,
        })
        .collect();
    ranking.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranking
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_policy() {
        let policy = PredictionPolicy::default();
        assert_eq!(ConfidenceLevel::from_confidence(95.0, &policy), ConfidenceLevel::Excellent);
        assert_eq!(ConfidenceLevel::from_confidence(90.0, &policy), ConfidenceLevel::Excellent);
        assert_eq!(ConfidenceLevel::from_confidence(70.0, &policy), ConfidenceLevel::Good);
        assert_eq!(ConfidenceLevel::from_confidence(69.99, &policy), ConfidenceLevel::Low);

        let strict = PredictionPolicy {
            excellent_at: 99.0,
            ..policy
        };
        assert_eq!(ConfidenceLevel::from_confidence(95.0, &strict), ConfidenceLevel::Good);
    }

    #[test]
    fn level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConfidenceLevel::Excellent).unwrap(),
            "\"excellent\""
        );
    }

    #[test]
    fn sample_reading_notes() {
        let notes = analyze_conditions(&FeatureVector::sample());
        assert_eq!(
            notes,
            vec![
                "High humidity suitable for moisture-loving crops".to_string(),
                "High rainfall supports water-intensive crops".to_string(),
            ]
        );
    }

    #[test]
    fn dry_hot_acidic_reading_notes() {
        let f = FeatureVector::from_array([10.0, 10.0, 10.0, 35.0, 30.0, 5.0, 50.0]);
        let notes = analyze_conditions(&f);
        assert_eq!(notes.len(), 4);
        assert!(notes[0].starts_with("High temperature"));
        assert!(notes[3].starts_with("Acidic soil"));
    }

    #[test]
    fn moderate_reading_has_no_notes() {
        let f = FeatureVector::from_array([50.0, 50.0, 50.0, 22.0, 65.0, 6.8, 150.0]);
        assert!(analyze_conditions(&f).is_empty());
    }

    #[test]
    fn whole_number_confidence_keeps_one_decimal() {
        let policy = PredictionPolicy::default();
        let e = explain("rice", 100.0, &FeatureVector::sample(), &policy);
        assert!(e.recommendation.ends_with("with 100.0% confidence."));
        let e = explain("maize", 97.0, &FeatureVector::sample(), &policy);
        assert!(e.recommendation.ends_with("with 97.0% confidence."));
    }

    #[test]
    fn unknown_crop_gets_generic_info() {
        assert_eq!(crop_info("lentil"), "lentil is suitable for the provided conditions.");
        assert!(crop_info("rice").starts_with("Rice thrives"));
    }

    #[test]
    fn recommendation_sentence() {
        let e = explain("rice", 97.456, &FeatureVector::sample(), &PredictionPolicy::default());
        assert_eq!(e.confidence_level, ConfidenceLevel::Excellent);
        assert_eq!(
            e.recommendation,
            "Based on your soil and climate conditions, rice is the most suitable crop \
             with 97.5% confidence."
        );
    }
}
