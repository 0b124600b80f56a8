//! Holdout evaluation

use super::Regressor;
use crate::models::EncodedFeatureVector;
use serde::{Deserialize, Serialize};

/// Holdout MAPE above which a model is considered unfit for use
pub const DEFAULT_MAPE_THRESHOLD: f64 = 0.40;

/// Regression quality measured on the holdout split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Mean absolute percentage error, relative to the actual price
    pub mape: f64,
    pub rmse: f64,
    pub mae: f64,
    /// 90th percentile of the absolute percentage error
    pub ape_p90: f64,
    pub holdout_rows: usize,
    pub mape_threshold: f64,
    pub within_threshold: bool,
}

impl Metrics {
    /// Evaluate `model` against labeled holdout rows
    pub fn evaluate<M: Regressor + ?Sized>(
        model: &M,
        features: &[EncodedFeatureVector],
        labels: &[f64],
        mape_threshold: f64,
    ) -> Self {
        let predictions: Vec<f64> = features.iter().map(|f| model.predict(f)).collect();
        Self::from_predictions(&predictions, labels, mape_threshold)
    }

    pub fn from_predictions(predictions: &[f64], actuals: &[f64], mape_threshold: f64) -> Self {
        let n = predictions.len().min(actuals.len());
        if n == 0 {
            return Self {
                mape: 0.0,
                rmse: 0.0,
                mae: 0.0,
                ape_p90: 0.0,
                holdout_rows: 0,
                mape_threshold,
                within_threshold: false,
            };
        }

        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        let mut apes = Vec::with_capacity(n);
        for (&predicted, &actual) in predictions.iter().zip(actuals) {
            let error = predicted - actual;
            abs_sum += error.abs();
            sq_sum += error * error;
            apes.push((error / actual).abs());
        }
        let mape = apes.iter().sum::<f64>() / n as f64;

        apes.sort_by(|a, b| a.total_cmp(b));
        let p90_index = ((n - 1) as f64 * 0.9).round() as usize;

        Self {
            mape,
            rmse: (sq_sum / n as f64).sqrt(),
            mae: abs_sum / n as f64,
            ape_p90: apes[p90_index.min(n - 1)],
            holdout_rows: n,
            mape_threshold,
            within_threshold: mape <= mape_threshold,
        }
    }
}
