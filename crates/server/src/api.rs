//! HTTP API: prediction, health checks and Prometheus metrics

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use valuation_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::{StructuredLogger, ValuationMetrics},
    PredictionError, PredictionResult, PredictionService, RawPropertyRecord, ValidationError,
};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const SERVICE_NAME: &str = "property-valuation";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state
pub struct AppState {
    pub service: Arc<PredictionService>,
    pub health_registry: HealthRegistry,
    pub metrics: ValuationMetrics,
    pub logger: StructuredLogger,
    api_keys: Vec<String>,
}

impl AppState {
    pub fn new(
        service: Arc<PredictionService>,
        health_registry: HealthRegistry,
        metrics: ValuationMetrics,
        logger: StructuredLogger,
        api_keys: Vec<String>,
    ) -> Self {
        Self {
            service,
            health_registry,
            metrics,
            logger,
            api_keys,
        }
    }

    fn accepts(&self, key: &str) -> bool {
        self.api_keys.iter().any(|k| k == key)
    }
}

/// Errors returned to API callers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing X-API-Key header")]
    MissingApiKey,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("prediction failed: {0}")]
    Prediction(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, field) = match &self {
            ApiError::MissingApiKey | ApiError::InvalidApiKey => {
                (StatusCode::UNAUTHORIZED, "unauthorized", None)
            }
            ApiError::InvalidBody(_) => (StatusCode::BAD_REQUEST, "invalid_body", None),
            ApiError::Validation(e) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", Some(e.field()))
            }
            ApiError::Prediction(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "prediction_failed", None)
            }
        };
        let body = ErrorBody {
            error,
            field,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Rejects requests without a configured `X-API-Key`
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = req
        .headers()
        .get(API_KEY_HEADER)
        .ok_or(ApiError::MissingApiKey)?
        .to_str()
        .map_err(|_| ApiError::InvalidApiKey)?;

    if !state.accepts(key) {
        warn!(event = "auth_rejected", "Request with unknown API key");
        return Err(ApiError::InvalidApiKey);
    }

    Ok(next.run(req).await)
}

#[derive(Debug, Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
    model_version: String,
    status: &'static str,
}

async fn root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ServiceInfo {
        name: SERVICE_NAME,
        version: SERVICE_VERSION,
        model_version: state.service.model_version().to_string(),
        status: "ok",
    })
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn live() -> impl IntoResponse {
    Json(serde_json::json!({ "alive": true }))
}

/// Readiness check response - returns 200 once the artifact is resident
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Training provenance returned alongside every estimate
#[derive(Debug, Serialize)]
pub struct ModelMetadata {
    pub trained_at: DateTime<Utc>,
    pub train_rows: usize,
    pub holdout_mape: f64,
    pub holdout_rmse: f64,
    pub holdout_mae: f64,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    #[serde(flatten)]
    pub result: PredictionResult,
    pub metadata: ModelMetadata,
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

async fn predict(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<RawPropertyRecord>, JsonRejection>,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let request_id = request_id(&headers);

    let Json(raw) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;

    let outcome = state.service.predict(&raw, request_id.clone());
    state
        .metrics
        .observe_prediction_latency(start.elapsed().as_secs_f64());

    let result = match outcome {
        Ok(result) => result,
        Err(PredictionError::Validation(e)) => {
            state.metrics.inc_validation_failure(e.field(), e.kind());
            state
                .logger
                .log_validation_failure(&request_id, e.field(), &e.to_string());
            return Err(ApiError::Validation(e));
        }
        Err(e) => {
            state.metrics.inc_prediction_errors();
            error!(request_id = %request_id, error = %e, "Prediction failed");
            if matches!(e, PredictionError::NonFiniteOutput { .. }) {
                state.health_registry.prediction_failed(e.to_string()).await;
            }
            return Err(ApiError::Prediction(e.to_string()));
        }
    };

    state.metrics.inc_predictions();
    if result.low_confidence_reason.is_some() {
        state.metrics.inc_low_confidence();
    }
    let sector = raw
        .sector
        .as_ref()
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    state.logger.log_prediction(
        &request_id,
        sector,
        result.prediction,
        result.confidence,
        &result.model_version,
    );

    let meta = state.service.metadata();
    let response = PredictResponse {
        result,
        metadata: ModelMetadata {
            trained_at: meta.trained_at,
            train_rows: meta.train_rows,
            holdout_mape: meta.metrics.mape,
            holdout_rmse: meta.metrics.rmse,
            holdout_mae: meta.metrics.mae,
        },
    };

    let mut response = (StatusCode::OK, Json(response)).into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/predict", post(predict))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
        .merge(protected)
        .with_state(state)
}

/// Start the API server, returning once `shutdown` resolves
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
