use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::{collections::BTreeMap, sync::Arc};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::ServiceConfig;
use crate::error::{finite, ServiceError, ServiceResult};
use crate::explain;
use crate::features::{self, FeatureVector, FEATURES, FEATURE_NAMES};
use crate::inference;
use crate::model::{ModelHandle, ModelStore};
use crate::types::{
    CropsResponse, FeaturesResponse, HealthResponse, ModelInfoResponse, PredictResponse,
    Recommendation, TrainResponse,
};

const SERVICE_NAME: &str = "Crop Recommendation";
const MODEL_NAME: &str = "Random Forest Classifier";

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<ModelHandle>,
    pub store: Arc<ModelStore>,
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(model: ModelHandle, store: ModelStore, config: ServiceConfig) -> Self {
        Self {
            model: Arc::new(model),
            store: Arc::new(store),
            config: Arc::new(config),
        }
    }
}

// ---------- Router ----------

/// Every route is served at the root and again under `/api`.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.frontend_url);
    let routes = Router::new()
        .route("/health", get(health))
        .route("/model/info", get(model_info))
        .route("/model/train", post(train_model))
        .route("/crops", get(crops))
        .route("/features", get(feature_schema))
        .route("/predict", post(predict));

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .fallback(not_found)
        .layer(cors)
        .with_state(state)
}

/// The configured frontend plus preview deployments on vercel.app.
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let frontend = HeaderValue::from_str(frontend_url.trim_end_matches('/')).ok();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            frontend.as_ref() == Some(origin)
                || origin
                    .to_str()
                    .map(|o| o.starts_with("https://") && o.ends_with(".vercel.app"))
                    .unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

// ---------- Handlers ----------

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        model: MODEL_NAME,
        model_loaded: state.model.is_loaded(),
        timestamp: timestamp(),
    })
}

pub async fn model_info(State(state): State<AppState>) -> ServiceResult<Json<ModelInfoResponse>> {
    let model = state.model.get_model()?;
    let report = &model.report;
    Ok(Json(ModelInfoResponse {
        success: true,
        model_type: MODEL_NAME,
        algorithm: "Ensemble Learning - Random Forest",
        purpose: "Crop Recommendation based on Soil & Climate Conditions",
        accuracy: finite("accuracy", report.accuracy)?,
        feature_names: FEATURE_NAMES.to_vec(),
        feature_descriptions: FEATURES.iter().map(|f| (f.name, f.description)).collect(),
        n_crops: model.labels.len(),
        crops: model.labels.clone(),
        n_estimators: model.classifier.n_trees(),
        total_samples: report.total_samples,
        train_samples: report.train_samples,
        test_samples: report.test_samples,
        trained_at: report.trained_at.clone(),
    }))
}

/// Retrains from the dataset off the async runtime, then swaps the model in.
/// On failure the previous model keeps serving.
pub async fn train_model(State(state): State<AppState>) -> ServiceResult<Json<TrainResponse>> {
    let store = state.store.clone();
    let model = tokio::task::spawn_blocking(move || store.train())
        .await
        .map_err(|e| ServiceError::Internal(format!("training task failed: {}", e)))??;

    let report = model.report.clone();
    state.model.replace(model);
    tracing::info!("model retrained, accuracy {:.2}%", report.accuracy);

    Ok(Json(TrainResponse {
        success: true,
        message: "Model trained successfully",
        report,
    }))
}

pub async fn crops(State(state): State<AppState>) -> ServiceResult<Json<CropsResponse>> {
    let model = state.model.get_model()?;
    let crops = model.labels.clone();
    Ok(Json(CropsResponse {
        success: true,
        total_crops: crops.len(),
        crops,
    }))
}

pub async fn feature_schema() -> Json<FeaturesResponse> {
    Json(FeaturesResponse {
        success: true,
        required_fields: FEATURE_NAMES.to_vec(),
        feature_ranges: FEATURES.iter().map(|f| (f.name, *f)).collect(),
        sample_input: FeatureVector::sample(),
    })
}

pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> ServiceResult<Json<PredictResponse>> {
    let Json(body) = payload.map_err(|e| ServiceError::BadRequest(e.body_text()))?;
    let cfg = &state.config;

    let validated = features::validate(&body, cfg.enforce_ranges)?;
    let input = validated.features;
    for w in &validated.warnings {
        tracing::debug!(
            "{}={} outside advisory range {}..={}",
            w.feature,
            w.value,
            w.min,
            w.max
        );
    }

    let model = state.model.get_model()?;

    // Debug signal so odd inputs can be spotted in the logs
    if cfg.log_predictions {
        let sample: Vec<String> = FEATURE_NAMES
            .iter()
            .zip(input.to_array())
            .map(|(name, v)| format!("{}={:.3}", name, v))
            .collect();
        tracing::info!(
            "recv predict in_dim={} warnings={} sample=[{}]",
            FEATURE_NAMES.len(),
            validated.warnings.len(),
            sample.join(", ")
        );
    }

    let prediction = inference::predict(&model, &input, &cfg.policy)?;
    let explanation =
        explain::explain(&prediction.crop, prediction.confidence, &input, &cfg.policy);
    let ranking = explain::importance_ranking(&model);

    let mut top_recommendations = Vec::with_capacity(prediction.top.len());
    for r in &prediction.top {
        top_recommendations.push(Recommendation {
            crop: r.crop.clone(),
            confidence: finite("confidence", r.confidence)?,
            suitable: r.suitable,
        });
    }

    let mut feature_importance = BTreeMap::new();
    for w in &ranking {
        feature_importance.insert(w.feature, finite(w.feature, w.importance)?);
    }
    // One entry per feature, so never empty for a validated model.
    let most_important_factor = ranking
        .first()
        .cloned()
        .ok_or_else(|| ServiceError::Internal("model reports no feature importances".into()))?;

    if cfg.log_predictions {
        tracing::info!(
            "predicted {} ({:.2}%), runner-up {:?}",
            prediction.crop,
            prediction.confidence,
            prediction.top.get(1).map(|r| r.crop.as_str())
        );
    }

    Ok(Json(PredictResponse {
        success: true,
        recommended_crop: prediction.crop,
        confidence: finite("confidence", prediction.confidence)?,
        top_recommendations,
        explanation,
        feature_importance,
        importance_ranking: ranking,
        most_important_factor,
        input_conditions: input,
        range_warnings: validated.warnings,
        timestamp: timestamp(),
    }))
}

async fn not_found() -> ServiceError {
    ServiceError::NotFound
}
