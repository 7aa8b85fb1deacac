use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::config::ServiceConfig;
use crate::dataset::Dataset;
use crate::error::{ModelError, ServiceError};
use crate::features::{FEATURE_NAMES, N_FEATURES};
use crate::forest::{ForestParams, RandomForest};
use crate::scaler::StandardScaler;

/// Facts about the training run, persisted with the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Held-out accuracy in percent, two decimals.
    pub accuracy: f64,
    pub total_samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub n_crops: usize,
    pub crops: Vec<String>,
    pub trained_at: String,
}

/// On-disk form of the classifier artifact.
#[derive(Serialize, Deserialize)]
struct ClassifierArtifact {
    feature_names: Vec<String>,
    labels: Vec<String>,
    forest: RandomForest,
    report: TrainingReport,
}

/// A trained classifier with its scaler and class labels. Never mutated.
#[derive(Debug, Clone)]
pub struct CropModel {
    pub classifier: RandomForest,
    pub scaler: StandardScaler,
    /// Class index -> crop name, sorted.
    pub labels: Vec<String>,
    pub report: TrainingReport,
}

impl CropModel {
    fn check(&self) -> Result<(), ModelError> {
        if self.classifier.n_features() != N_FEATURES {
            return Err(ModelError::Dimension {
                got: self.classifier.n_features(),
                expected: N_FEATURES,
            });
        }
        if self.scaler.n_features() != N_FEATURES {
            return Err(ModelError::Dimension {
                got: self.scaler.n_features(),
                expected: N_FEATURES,
            });
        }
        if self.labels.len() != self.classifier.n_classes() {
            return Err(ModelError::Inconsistent(format!(
                "{} labels for {} classes",
                self.labels.len(),
                self.classifier.n_classes()
            )));
        }
        if self.scaler.std().iter().any(|s| !s.is_finite() || *s <= 0.0)
            || self.scaler.mean().iter().any(|m| !m.is_finite())
        {
            return Err(ModelError::Inconsistent("scaler has unusable statistics".into()));
        }
        self.classifier.validate()
    }
}

/// Where the model comes from and how it is trained.
#[derive(Debug)]
pub struct ModelStore {
    model_path: PathBuf,
    scaler_path: PathBuf,
    dataset_path: PathBuf,
    params: ForestParams,
    test_fraction: f64,
    /// Serializes training runs so two retrains never write the same artifacts.
    train_lock: Mutex<()>,
}

impl ModelStore {
    pub fn new(
        model_path: impl Into<PathBuf>,
        scaler_path: impl Into<PathBuf>,
        dataset_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model_path: model_path.into(),
            scaler_path: scaler_path.into(),
            dataset_path: dataset_path.into(),
            params: ForestParams::default(),
            test_fraction: 0.2,
            train_lock: Mutex::new(()),
        }
    }

    pub fn from_config(cfg: &ServiceConfig) -> Self {
        Self::new(&cfg.model_path, &cfg.scaler_path, &cfg.dataset_path)
            .with_params(cfg.forest)
            .with_test_fraction(cfg.test_fraction)
    }

    pub fn with_params(mut self, params: ForestParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_test_fraction(mut self, test_fraction: f64) -> Self {
        self.test_fraction = test_fraction;
        self
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn scaler_path(&self) -> &Path {
        &self.scaler_path
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    /// Loads both artifacts, falling back to training when either is absent
    /// or unusable. Only a training failure is an error.
    pub fn load_or_train(&self) -> Result<CropModel, ModelError> {
        if self.model_path.exists() && self.scaler_path.exists() {
            match self.load() {
                Ok(model) => {
                    tracing::info!(
                        "loaded existing model from {} ({} crops, {} trees)",
                        self.model_path.display(),
                        model.labels.len(),
                        model.classifier.n_trees()
                    );
                    return Ok(model);
                }
                Err(e) => {
                    tracing::warn!("failed to load existing model, will train new one: {}", e)
                }
            }
        } else {
            tracing::info!("no persisted model at {}, training", self.model_path.display());
        }
        self.train()
    }

    pub fn load(&self) -> Result<CropModel, ModelError> {
        let artifact: ClassifierArtifact = read_json(&self.model_path)?;
        let scaler: StandardScaler = read_json(&self.scaler_path)?;

        if artifact.feature_names != FEATURE_NAMES {
            return Err(ModelError::Inconsistent(format!(
                "artifact was trained on features {:?}",
                artifact.feature_names
            )));
        }
        let model = CropModel {
            classifier: artifact.forest,
            scaler,
            labels: artifact.labels,
            report: artifact.report,
        };
        model.check()?;
        Ok(model)
    }

    /// Trains from the dataset and persists the result.
    ///
    /// Split, scaler fit and forest fit are all seeded from `params.seed`.
    pub fn train(&self) -> Result<CropModel, ModelError> {
        let _guard = self.train_lock.lock();
        let dataset = Dataset::from_csv(&self.dataset_path)?;
        let labels = dataset.class_names();
        if labels.len() < 2 {
            return Err(ModelError::TooFewClasses(labels.len()));
        }
        let y_all = dataset.encoded_labels(&labels)?;
        let split = dataset.stratified_split(self.test_fraction, self.params.seed);

        let train_rows = dataset.select(&split.train);
        let test_rows = dataset.select(&split.test);
        let y_train: Vec<usize> = split.train.iter().map(|&i| y_all[i]).collect();
        let y_test: Vec<usize> = split.test.iter().map(|&i| y_all[i]).collect();

        let scaler = StandardScaler::fit(&train_rows)?;
        let x_train = scaler.transform_rows(&train_rows)?;
        let x_test = scaler.transform_rows(&test_rows)?;

        tracing::info!(
            "training random forest: {} trees on {} rows, {} crops",
            self.params.n_estimators,
            x_train.len(),
            labels.len()
        );
        let classifier = RandomForest::fit(&x_train, &y_train, labels.len(), self.params)?;
        let accuracy = classifier.score(&x_test, &y_test)?;

        let report = TrainingReport {
            accuracy: round_to(accuracy * 100.0, 2),
            total_samples: dataset.len(),
            train_samples: x_train.len(),
            test_samples: x_test.len(),
            n_crops: labels.len(),
            crops: labels.clone(),
            trained_at: Utc::now().to_rfc3339(),
        };
        let model = CropModel {
            classifier,
            scaler,
            labels,
            report,
        };

        self.save(&model)?;
        tracing::info!(
            "trained new random forest model - accuracy: {:.2}%, crops: {}",
            model.report.accuracy,
            model.report.n_crops
        );
        Ok(model)
    }

    pub fn save(&self, model: &CropModel) -> Result<(), ModelError> {
        let artifact = ClassifierArtifact {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            labels: model.labels.clone(),
            forest: model.classifier.clone(),
            report: model.report.clone(),
        };
        write_json(&self.model_path, &artifact)?;
        write_json(&self.scaler_path, &model.scaler)?;
        tracing::debug!(
            "saved model to {} and scaler to {}",
            self.model_path.display(),
            self.scaler_path.display()
        );
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let file = fs::File::open(path).map_err(|source| ModelError::ArtifactIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ModelError::ArtifactFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes to a sibling temp file and renames, so readers never see half an artifact.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ModelError> {
    let io_err = |source| ModelError::ArtifactIo {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut writer = BufWriter::new(fs::File::create(&tmp).map_err(io_err)?);
    serde_json::to_writer(&mut writer, value).map_err(|source| ModelError::ArtifactFormat {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Shared, swappable reference to the current model.
///
/// Readers clone the `Arc` and drop the lock immediately; a retrain replaces
/// the whole model, so a request never sees a half-updated one.
#[derive(Debug, Default)]
pub struct ModelHandle {
    current: RwLock<Option<Arc<CropModel>>>,
}

impl ModelHandle {
    pub fn new(model: CropModel) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(model))),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get_model(&self) -> Result<Arc<CropModel>, ServiceError> {
        self.current.read().clone().ok_or(ServiceError::ModelNotReady)
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn replace(&self, model: CropModel) {
        *self.current.write() = Some(Arc::new(model));
    }
}
