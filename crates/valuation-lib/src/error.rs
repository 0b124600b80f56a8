//! Error taxonomy for the valuation pipeline
//!
//! Validation errors are caused by callers and carry the offending field.
//! Training and artifact errors are operator-facing and stop the affected
//! process before it can train or serve.

use std::path::PathBuf;
use thiserror::Error;

/// A property record failed schema validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("invalid value {value:?} for `{field}`, expected one of: {expected}")]
    InvalidCategory {
        field: &'static str,
        value: String,
        expected: String,
    },

    #[error("`{field}` must be a number, got {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("`{field}` = {value} is out of range: {constraint}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        constraint: String,
    },
}

impl ValidationError {
    /// Name of the field that failed validation
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField { field }
            | ValidationError::InvalidCategory { field, .. }
            | ValidationError::InvalidNumber { field, .. }
            | ValidationError::OutOfRange { field, .. } => field,
        }
    }

    /// Short machine-readable kind, used for metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::MissingField { .. } => "missing_field",
            ValidationError::InvalidCategory { .. } => "invalid_category",
            ValidationError::InvalidNumber { .. } => "invalid_number",
            ValidationError::OutOfRange { .. } => "out_of_range",
        }
    }
}

/// A training run could not produce a model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("insufficient training data: {rows} rows, at least {required} required")]
    InsufficientData { rows: usize, required: usize },

    #[error("all {rows} labels are equal to {value}; the regression objective is undefined")]
    DegenerateLabel { rows: usize, value: f64 },

    #[error("feature/label count mismatch: {features} feature rows, {labels} labels")]
    ShapeMismatch { features: usize, labels: usize },

    #[error("feature vectors must all have {expected} columns, found one with {found}")]
    InconsistentFeatures { expected: usize, found: usize },

    #[error("holdout split is empty; cannot evaluate the model")]
    EmptyHoldout,

    #[error("holdout MAPE {mape:.4} exceeds the required threshold {threshold:.4}")]
    MetricGate { mape: f64, threshold: f64 },
}

/// An artifact could not be stored or loaded
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found: {location}")]
    NotFound { location: String },

    #[error("invalid artifact version {version:?}")]
    InvalidVersion { version: String },

    #[error("schema fingerprint mismatch: serving schema {expected}, artifact schema {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("corrupt artifact {path:?}: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("unsupported artifact format version {found} (supported: {supported})")]
    UnsupportedFormat { found: u32, supported: u32 },

    #[error("artifact I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ArtifactError::CorruptArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A data source could not yield training rows
#[derive(Error, Debug)]
pub enum DataError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path:?} has no `{column}` column")]
    MissingColumn { path: PathBuf, column: &'static str },
}

/// Failure of an end-to-end training run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// A prediction request could not be answered
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("model produced a non-finite estimate ({value})")]
    NonFiniteOutput { value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field() {
        let err = ValidationError::OutOfRange {
            field: "latitude",
            value: -56.01,
            constraint: "between -56 and -17".to_string(),
        };
        assert_eq!(err.field(), "latitude");
        assert_eq!(err.kind(), "out_of_range");
        assert!(err.to_string().contains("latitude"));
    }

    #[test]
    fn test_pipeline_error_is_transparent() {
        let err: PipelineError = TrainingError::InsufficientData { rows: 3, required: 20 }.into();
        assert_eq!(
            err.to_string(),
            "insufficient training data: 3 rows, at least 20 required"
        );
    }
}
