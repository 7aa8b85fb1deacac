use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::PathBuf};

use crate::forest::ForestParams;
use crate::inference::PredictionPolicy;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub dataset_path: PathBuf,
    pub frontend_url: String,
    /// One log line per prediction describing the input vector.
    pub log_predictions: bool,
    /// Reject out-of-range readings instead of only warning about them.
    pub enforce_ranges: bool,
    pub test_fraction: f64,
    pub forest: ForestParams,
    pub policy: PredictionPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5001,
            model_path: PathBuf::from("crop_model.json"),
            scaler_path: PathBuf::from("crop_scaler.json"),
            dataset_path: PathBuf::from("Crop_recommendation.csv"),
            frontend_url: "http://localhost:3000".to_string(),
            log_predictions: false,
            enforce_ranges: false,
            test_fraction: 0.2,
            forest: ForestParams::default(),
            policy: PredictionPolicy::default(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &str) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path))?;
        serde_json::from_str(&data).with_context(|| format!("invalid config JSON in {}", path))
    }

    /// Defaults, then `CONFIG_PATH` if set, then individual env overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::load(&path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = var("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(port) = var("PORT") {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT={:?} is not a port number", port))?;
        }
        if let Some(p) = var("MODEL_PATH") {
            self.model_path = p.into();
        }
        if let Some(p) = var("SCALER_PATH") {
            self.scaler_path = p.into();
        }
        if let Some(p) = var("DATASET_PATH") {
            self.dataset_path = p.into();
        }
        if let Some(url) = var("FRONTEND_URL") {
            self.frontend_url = url;
        }
        if let Some(v) = var("LOG_PRED") {
            self.log_predictions = v == "1";
        }
        if let Some(v) = var("ENFORCE_RANGES") {
            self.enforce_ranges = matches!(v.as_str(), "1" | "true" | "yes");
        }
        // Accuracy is measured on the held-out rows, so some must exist.
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            anyhow::bail!("test_fraction must be in (0, 1), got {}", self.test_fraction);
        }
        Ok(())
    }
}
