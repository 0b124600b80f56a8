//! Health of the serving process
//!
//! The `artifact` component describes the loaded model file and the
//! `predictor` component describes how well that model can be trusted:
//! it turns degraded when the holdout MAPE missed its threshold or when
//! the model produced an unusable estimate. Readiness flips once, after
//! the artifact is resident.

use crate::trainer::Metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    pub const ARTIFACT: &str = "artifact";
    pub const PREDICTOR: &str = "predictor";
}

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Serving, but estimates deserve less trust
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            checked_at: Utc::now(),
        }
    }
}

/// Body of `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of `/health/ready`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    components: BTreeMap<String, ComponentHealth>,
    model_version: Option<String>,
    ready: bool,
}

/// Shared, cloneable view of the process health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly loaded artifact and mark the process ready
    ///
    /// The predictor starts degraded when the artifact's holdout MAPE did
    /// not meet its threshold.
    pub async fn artifact_loaded(&self, version: &str, metrics: &Metrics) {
        let predictor = if metrics.within_threshold {
            ComponentHealth::new(ComponentStatus::Healthy, None)
        } else {
            ComponentHealth::new(
                ComponentStatus::Degraded,
                Some(format!(
                    "Holdout MAPE {:.1}% exceeds the {:.1}% threshold",
                    metrics.mape * 100.0,
                    metrics.mape_threshold * 100.0
                )),
            )
        };

        let mut state = self.state.write().await;
        state.components.insert(
            components::ARTIFACT.to_string(),
            ComponentHealth::new(ComponentStatus::Healthy, Some(format!("Serving {version}"))),
        );
        state
            .components
            .insert(components::PREDICTOR.to_string(), predictor);
        state.model_version = Some(version.to_string());
        state.ready = true;
    }

    /// The model returned an estimate that could not be served
    pub async fn prediction_failed(&self, reason: impl Into<String>) {
        self.set_degraded(components::PREDICTOR, reason).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, message.into()).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, message.into()).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: String) {
        let mut state = self.state.write().await;
        let entry = state
            .components
            .entry(name.to_string())
            .or_insert_with(|| ComponentHealth::new(status, None));
        // Never improve a component through a failure report
        if status >= entry.status {
            *entry = ComponentHealth::new(status, Some(message));
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: worst(&state.components),
            timestamp: Utc::now(),
            model_version: state.model_version.clone(),
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.ready {
            Some("Model artifact not loaded")
        } else if worst(&state.components) == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

fn worst(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
    components
        .values()
        .map(|c| c.status)
        .max()
        .unwrap_or(ComponentStatus::Healthy)
}
