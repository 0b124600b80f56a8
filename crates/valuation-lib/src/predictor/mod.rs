//! Prediction service
//!
//! Holds one loaded pipeline and answers requests against it. The service
//! is immutable once built, so a single instance is shared across
//! concurrent requests behind an `Arc` without locking.

mod output;

pub use output::{OutputConfig, OutputFormatter, OUT_OF_RANGE_PENALTY, UNSEEN_CATEGORY_PENALTY};

use crate::artifact::{ArtifactMetadata, ModelArtifact};
use crate::encoder::{FeatureEncoder, TargetEncoder};
use crate::error::{PredictionError, TrainingError};
use crate::models::{PredictionResult, RawPropertyRecord};
use crate::schema::validate_record;
use crate::trainer::{GradientBoostedModel, Regressor};
use tracing::debug;

/// Validates, encodes and scores property records with a fitted pipeline
pub struct PredictionService<E = TargetEncoder, M = GradientBoostedModel> {
    encoder: E,
    model: M,
    model_version: String,
    metadata: ArtifactMetadata,
    formatter: OutputFormatter,
}

impl PredictionService<TargetEncoder, GradientBoostedModel> {
    /// Serve a loaded artifact
    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        // Dimensions were checked when the artifact was decoded
        Self {
            encoder: artifact.encoder,
            model: artifact.model,
            model_version: artifact.version,
            metadata: artifact.metadata,
            formatter: OutputFormatter::new(),
        }
    }
}

impl<E: FeatureEncoder, M: Regressor> PredictionService<E, M> {
    /// Serve an explicit encoder and model
    pub fn new(
        encoder: E,
        model: M,
        model_version: impl Into<String>,
        metadata: ArtifactMetadata,
    ) -> Result<Self, TrainingError> {
        if encoder.dimension() != model.n_features() {
            return Err(TrainingError::InconsistentFeatures {
                expected: model.n_features(),
                found: encoder.dimension(),
            });
        }
        Ok(Self {
            encoder,
            model,
            model_version: model_version.into(),
            metadata,
            formatter: OutputFormatter::new(),
        })
    }

    pub fn with_formatter(mut self, formatter: OutputFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    /// Validate → encode → predict → attach confidence
    pub fn predict(
        &self,
        raw: &RawPropertyRecord,
        request_id: impl Into<String>,
    ) -> Result<PredictionResult, PredictionError> {
        let record = validate_record(raw)?;
        let features = self.encoder.transform(&record);
        let prediction = self.model.predict(&features);
        if !prediction.is_finite() {
            return Err(PredictionError::NonFiniteOutput { value: prediction });
        }

        let coverage = self.encoder.coverage(&record);
        let result = self.formatter.format(
            prediction,
            &coverage,
            &self.metadata.metrics,
            request_id.into(),
            &self.model_version,
        );

        debug!(
            request_id = %result.request_id,
            prediction = result.prediction,
            confidence = result.confidence,
            unseen = ?coverage.unseen_categories,
            out_of_range = ?coverage.out_of_range,
            "Prediction computed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Coverage, TargetEncoderConfig};
    use crate::error::ValidationError;
    use crate::models::{EncodedFeatureVector, PropertyRecord};
    use crate::trainer::{BoostingConfig, Metrics};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    /// Encoder that emits the usable area and nothing else
    struct AreaEncoder;

    impl FeatureEncoder for AreaEncoder {
        fn transform(&self, record: &PropertyRecord) -> EncodedFeatureVector {
            EncodedFeatureVector::new(vec![record.net_usable_area])
        }

        fn dimension(&self) -> usize {
            1
        }

        fn coverage(&self, record: &PropertyRecord) -> Coverage {
            let mut coverage = Coverage::default();
            if record.net_usable_area > 500.0 {
                coverage.out_of_range.push("net_usable_area");
            }
            coverage
        }
    }

    /// Price per square metre model
    struct PerMetre(f64);

    impl Regressor for PerMetre {
        fn predict(&self, features: &EncodedFeatureVector) -> f64 {
            features.get(0).unwrap_or(f64::NAN) * self.0
        }

        fn n_features(&self) -> usize {
            1
        }
    }

    fn metadata() -> ArtifactMetadata {
        ArtifactMetadata {
            trained_at: Utc::now(),
            feature_names: vec!["net_usable_area".into()],
            train_rows: 100,
            holdout_rows: 25,
            rejected_rows: 0,
            metrics: Metrics {
                mape: 0.2,
                rmse: 1.0,
                mae: 1.0,
                ape_p90: 0.35,
                holdout_rows: 25,
                mape_threshold: 0.4,
                within_threshold: true,
            },
            hyperparameters: BoostingConfig::default(),
            encoder: TargetEncoderConfig::default(),
        }
    }

    fn request() -> RawPropertyRecord {
        serde_json::from_value(json!({
            "type": "apartment",
            "sector": "Las Condes",
            "net_usable_area": 65.0,
            "net_area": 70.0,
            "n_rooms": 2,
            "n_bathroom": 1,
            "latitude": -33.45,
            "longitude": -70.65
        }))
        .unwrap()
    }

    fn service(per_metre: f64) -> PredictionService<AreaEncoder, PerMetre> {
        PredictionService::new(AreaEncoder, PerMetre(per_metre), "v-test", metadata()).unwrap()
    }

    #[test]
    fn test_predict_valid_request() {
        let result = service(100.0).predict(&request(), "req-1").unwrap();
        assert_eq!(result.prediction, 6_500.0);
        assert_eq!(result.request_id, "req-1");
        assert_eq!(result.model_version, "v-test");
        assert!((result.confidence - 0.8).abs() < 1e-12);
        assert!(result.interval.is_some());
    }

    #[test]
    fn test_validation_error_surfaces_field() {
        let mut raw = request();
        raw.latitude = Some(json!(-60.0));
        let err = service(100.0).predict(&raw, "req-2").unwrap_err();
        match err {
            PredictionError::Validation(e) => assert_eq!(e.field(), "latitude"),
            other => panic!("unexpected error: {other}"),
        }

        raw.latitude = None;
        assert_eq!(
            service(100.0).predict(&raw, "req-3").unwrap_err(),
            PredictionError::Validation(ValidationError::MissingField { field: "latitude" })
        );
    }

    #[test]
    fn test_non_finite_output_is_an_error() {
        let err = service(f64::INFINITY).predict(&request(), "req-4").unwrap_err();
        assert!(matches!(err, PredictionError::NonFiniteOutput { .. }));
    }

    #[test]
    fn test_extreme_valid_input_is_flagged_not_rejected() {
        let mut raw = request();
        raw.net_usable_area = Some(json!(900.0));
        raw.net_area = Some(json!(950.0));
        let result = service(100.0).predict(&raw, "req-5").unwrap();
        assert_eq!(result.prediction, 90_000.0);
        assert!(result.confidence < 0.8);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        struct Wide;
        impl Regressor for Wide {
            fn predict(&self, _: &EncodedFeatureVector) -> f64 {
                0.0
            }
            fn n_features(&self) -> usize {
                8
            }
        }
        assert!(PredictionService::new(AreaEncoder, Wide, "v", metadata()).is_err());
    }

    #[test]
    fn test_shared_across_threads() {
        let service = Arc::new(service(50.0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    let result = service.predict(&request(), format!("req-{i}")).unwrap();
                    result.prediction
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 3_250.0);
        }
    }
}
