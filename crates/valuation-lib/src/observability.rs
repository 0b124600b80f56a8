//! Observability infrastructure for the valuation service
//!
//! Provides:
//! - Prometheus metrics (prediction latency, prediction and error counts,
//!   validation failures by field, loaded model version)
//! - Structured JSON logging with tracing

use crate::trainer::Metrics;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for prediction latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ValuationMetricsInner> = OnceLock::new();

struct ValuationMetricsInner {
    prediction_latency_seconds: Histogram,
    predictions_total: IntCounter,
    prediction_errors_total: IntCounter,
    validation_failures_total: IntCounterVec,
    low_confidence_predictions_total: IntCounter,
    model_version_info: GaugeVec,
}

impl ValuationMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "property_valuation_prediction_latency_seconds",
                "Time spent validating, encoding and scoring one request",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions_total: register_int_counter!(
                "property_valuation_predictions_total",
                "Total number of predictions served"
            )
            .expect("Failed to register predictions_total"),

            prediction_errors_total: register_int_counter!(
                "property_valuation_prediction_errors_total",
                "Total number of requests the model could not answer"
            )
            .expect("Failed to register prediction_errors_total"),

            validation_failures_total: register_int_counter_vec!(
                "property_valuation_validation_failures_total",
                "Rejected prediction requests by field and reason",
                &["field", "kind"]
            )
            .expect("Failed to register validation_failures_total"),

            low_confidence_predictions_total: register_int_counter!(
                "property_valuation_low_confidence_predictions_total",
                "Predictions returned with a low-confidence reason"
            )
            .expect("Failed to register low_confidence_predictions_total"),

            model_version_info: register_gauge_vec!(
                "property_valuation_model_version_info",
                "Information about the loaded model artifact",
                &["version", "schema"]
            )
            .expect("Failed to register model_version_info"),
        }
    }
}

/// Handle to the process-wide Prometheus metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ValuationMetrics {
    _private: (),
}

impl Default for ValuationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ValuationMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ValuationMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ValuationMetricsInner {
        GLOBAL_METRICS.get_or_init(ValuationMetricsInner::new)
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn inc_predictions(&self) {
        self.inner().predictions_total.inc();
    }

    pub fn inc_prediction_errors(&self) {
        self.inner().prediction_errors_total.inc();
    }

    pub fn inc_validation_failure(&self, field: &str, kind: &str) {
        self.inner()
            .validation_failures_total
            .with_label_values(&[field, kind])
            .inc();
    }

    pub fn inc_low_confidence(&self) {
        self.inner().low_confidence_predictions_total.inc();
    }

    /// Update model version info
    pub fn set_model_version(&self, version: &str, schema_fingerprint: &str) {
        self.inner().model_version_info.reset();
        self.inner()
            .model_version_info
            .with_label_values(&[version, schema_fingerprint])
            .set(1.0);
    }
}

/// Structured logger for service and training events
///
/// Every line carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_prediction(
        &self,
        request_id: &str,
        sector: &str,
        prediction: f64,
        confidence: f64,
        model_version: &str,
    ) {
        info!(
            event = "prediction_generated",
            component = %self.component,
            request_id = %request_id,
            sector = %sector,
            prediction = prediction,
            confidence = confidence,
            model_version = %model_version,
            "Generated property valuation"
        );
    }

    pub fn log_validation_failure(&self, request_id: &str, field: &str, reason: &str) {
        info!(
            event = "validation_failed",
            component = %self.component,
            request_id = %request_id,
            field = %field,
            reason = %reason,
            "Rejected prediction request"
        );
    }

    pub fn log_training_completed(
        &self,
        model_version: &str,
        train_rows: usize,
        holdout_rows: usize,
        rejected_rows: usize,
        metrics: &Metrics,
    ) {
        if metrics.within_threshold {
            info!(
                event = "training_completed",
                component = %self.component,
                model_version = %model_version,
                train_rows = train_rows,
                holdout_rows = holdout_rows,
                rejected_rows = rejected_rows,
                mape = metrics.mape,
                rmse = metrics.rmse,
                mae = metrics.mae,
                "Model trained and saved"
            );
        } else {
            warn!(
                event = "training_completed",
                component = %self.component,
                model_version = %model_version,
                train_rows = train_rows,
                holdout_rows = holdout_rows,
                rejected_rows = rejected_rows,
                mape = metrics.mape,
                mape_threshold = metrics.mape_threshold,
                "Model saved with holdout MAPE above threshold"
            );
        }
    }

    pub fn log_artifact_activated(&self, version: &str, previous: Option<&str>) {
        info!(
            event = "artifact_activated",
            component = %self.component,
            version = %version,
            previous = previous.unwrap_or("none"),
            "Model artifact activated"
        );
    }

    pub fn log_startup(&self, service_version: &str, model_version: &str) {
        info!(
            event = "service_started",
            component = %self.component,
            service_version = %service_version,
            model_version = %model_version,
            "Valuation service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            component = %self.component,
            reason = %reason,
            "Valuation service shutting down"
        );
    }
}
