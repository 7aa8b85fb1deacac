use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// A request field that cannot be turned into a feature value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Request body must be a JSON object")]
    NotAnObject,
    #[error("Missing required field: {field}")]
    Missing { field: &'static str },
    #[error("Invalid value for {field}: {raw:?} is not a number")]
    NotNumeric { field: &'static str, raw: String },
    #[error("Invalid value for {field}: value must be finite")]
    NotFinite { field: &'static str },
    #[error("Invalid value for {field}: {value} is outside the accepted range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl ValidationError {
    /// Name of the offending field, if the error is about one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::NotAnObject => None,
            ValidationError::Missing { field }
            | ValidationError::NotNumeric { field, .. }
            | ValidationError::NotFinite { field }
            | ValidationError::OutOfRange { field, .. } => Some(field),
        }
    }
}

/// Failures while building, loading or persisting a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read dataset {path}: {source}")]
    Dataset {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("dataset is missing column {0:?}")]
    MissingColumn(String),
    #[error("dataset line {line}: column {column:?} has non-numeric value {value:?}")]
    BadCell {
        line: u64,
        column: String,
        value: String,
    },
    #[error("dataset has no usable rows")]
    EmptyDataset,
    #[error("dataset needs at least two crop labels, found {0}")]
    TooFewClasses(usize),
    #[error("artifact {path}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact {path}: {source}")]
    ArtifactFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("dimension mismatch: got {got}, expected {expected}")]
    Dimension { got: usize, expected: usize },
    #[error("model is inconsistent: {0}")]
    Inconsistent(String),
}

/// Everything a request handler can fail with.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Model not loaded. Please train the model first.")]
    ModelNotReady,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("cannot encode {what}: value is not a finite number")]
    Serialization { what: String },
    #[error("Invalid request body: {0}")]
    BadRequest(String),
    #[error("Endpoint not found")]
    NotFound,
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::ModelNotReady
            | ServiceError::Model(_)
            | ServiceError::Serialization { .. }
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::debug!("request rejected: {}", self);
        }
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Guard for numbers that are about to leave the process as JSON.
pub fn finite(what: &str, value: f64) -> ServiceResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ServiceError::Serialization {
            what: what.to_string(),
        })
    }
}
