//! Property valuation HTTP service
//!
//! Loads one model artifact at startup and serves predictions from it.

pub mod api;
pub mod config;

use anyhow::{Context, Result};
use std::sync::Arc;
use valuation_lib::{
    health::HealthRegistry,
    observability::{StructuredLogger, ValuationMetrics},
    schema::FeatureSchema,
    ArtifactStore, PredictionService,
};

use crate::api::AppState;
use crate::config::ServerConfig;

/// Load the configured artifact and assemble the shared state
///
/// Fails if the artifact cannot be loaded; the service never serves
/// without a model.
pub async fn build_state(config: &ServerConfig) -> Result<Arc<AppState>> {
    let health_registry = HealthRegistry::new();
    let metrics = ValuationMetrics::new();
    let logger = StructuredLogger::new("server");

    let store = ArtifactStore::open(&config.model_dir, &config.model_name);
    let selector = config.artifact_selector();
    let artifact = store.load(&selector).with_context(|| {
        format!(
            "Failed to load {} artifact from {}",
            selector,
            config.model_dir.display()
        )
    })?;

    metrics.set_model_version(&artifact.version, &FeatureSchema::current().fingerprint);
    logger.log_artifact_activated(&artifact.version, None);
    health_registry
        .artifact_loaded(&artifact.version, &artifact.metadata.metrics)
        .await;

    let service = Arc::new(PredictionService::from_artifact(artifact));
    let state = AppState::new(
        service,
        health_registry.clone(),
        metrics,
        logger,
        config.api_keys.clone(),
    );
    Ok(Arc::new(state))
}
