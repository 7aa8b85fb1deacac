//! Crop recommendation service: a Random Forest over seven soil and climate
//! readings, served as a small JSON API.

pub mod config;
pub mod dataset;
pub mod error;
pub mod explain;
pub mod features;
pub mod forest;
pub mod inference;
pub mod model;
pub mod routes;
pub mod scaler;
pub mod types;

pub use config::ServiceConfig;
pub use error::{ModelError, ServiceError, ValidationError};
pub use features::FeatureVector;
pub use model::{CropModel, ModelHandle, ModelStore};
pub use routes::{router, AppState};
