//! Property valuation library
//!
//! This crate provides the core functionality for:
//! - Validating Chilean property listings
//! - Target-encoding listing features
//! - Training gradient-boosted price models
//! - Persisting versioned model artifacts
//! - Serving predictions from a loaded artifact
//! - Health checks and observability

pub mod artifact;
pub mod data;
pub mod encoder;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod predictor;
pub mod schema;
pub mod trainer;

pub use artifact::{
    ArtifactHandle, ArtifactSelector, ArtifactStore, ArtifactStoreConfig, ModelArtifact,
};
pub use error::{
    ArtifactError, DataError, PipelineError, PredictionError, TrainingError, ValidationError,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, ValuationMetrics};
pub use pipeline::{TrainingConfig, TrainingPipeline, TrainingReport};
pub use predictor::PredictionService;
