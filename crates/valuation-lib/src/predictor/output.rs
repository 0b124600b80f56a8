//! Prediction post-processing
//!
//! Turns a raw model estimate into a [`PredictionResult`] with a
//! confidence score, an interval and, when warranted, a reason the
//! estimate should not be trusted.

use crate::encoder::Coverage;
use crate::models::{PredictionInterval, PredictionResult};
use crate::trainer::Metrics;

/// Confidence multiplier per categorical value never seen during training
pub const UNSEEN_CATEGORY_PENALTY: f64 = 0.8;

/// Confidence multiplier per numeric feature outside the training range
pub const OUT_OF_RANGE_PENALTY: f64 = 0.7;

/// Configuration for output formatting
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub unseen_category_penalty: f64,
    pub out_of_range_penalty: f64,
    /// Results below this confidence carry a reason
    pub low_confidence_threshold: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            unseen_category_penalty: UNSEEN_CATEGORY_PENALTY,
            out_of_range_penalty: OUT_OF_RANGE_PENALTY,
            low_confidence_threshold: 0.5,
        }
    }
}

/// Builds prediction results from model output and holdout metrics
#[derive(Debug, Clone, Default)]
pub struct OutputFormatter {
    config: OutputConfig,
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn format(
        &self,
        prediction: f64,
        coverage: &Coverage,
        metrics: &Metrics,
        request_id: String,
        model_version: &str,
    ) -> PredictionResult {
        let base = base_confidence(metrics);
        let confidence = self.confidence(base, coverage);
        let interval = interval(prediction, metrics, base, confidence);
        let low_confidence_reason = self.low_confidence_reason(confidence, coverage, metrics);

        PredictionResult {
            request_id,
            prediction,
            confidence,
            interval,
            low_confidence_reason,
            model_version: model_version.to_string(),
        }
    }

    /// Holdout-derived confidence, reduced for every gap in training coverage
    pub fn confidence(&self, base: f64, coverage: &Coverage) -> f64 {
        let unseen = coverage.unseen_categories.len() as i32;
        let out_of_range = coverage.out_of_range.len() as i32;
        (base
            * self.config.unseen_category_penalty.powi(unseen)
            * self.config.out_of_range_penalty.powi(out_of_range))
        .clamp(0.0, 1.0)
    }

    pub fn is_low_confidence(&self, confidence: f64) -> bool {
        confidence < self.config.low_confidence_threshold
    }

    pub fn low_confidence_reason(
        &self,
        confidence: f64,
        coverage: &Coverage,
        metrics: &Metrics,
    ) -> Option<String> {
        if !self.is_low_confidence(confidence) {
            return None;
        }

        let mut parts = Vec::new();
        if !coverage.unseen_categories.is_empty() {
            parts.push(format!(
                "unseen {} in training data",
                coverage.unseen_categories.join(" and ")
            ));
        }
        if !coverage.out_of_range.is_empty() {
            parts.push(format!(
                "{} outside the training range",
                coverage.out_of_range.join(", ")
            ));
        }
        if parts.is_empty() || !metrics.within_threshold {
            parts.push(format!("model holdout MAPE is {:.1}%", metrics.mape * 100.0));
        }
        Some(parts.join("; "))
    }
}

fn base_confidence(metrics: &Metrics) -> f64 {
    if metrics.mape.is_finite() {
        (1.0 - metrics.mape).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Band of `ape_p90` around the estimate, widened as confidence drops
fn interval(prediction: f64, metrics: &Metrics, base: f64, confidence: f64) -> Option<PredictionInterval> {
    if confidence <= 0.0 || !metrics.ape_p90.is_finite() {
        return None;
    }
    let width = metrics.ape_p90 * base / confidence;
    let interval = PredictionInterval {
        lower: (prediction * (1.0 - width)).max(0.0),
        upper: prediction * (1.0 + width),
    };
    (interval.lower.is_finite() && interval.upper.is_finite()).then_some(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(mape: f64, ape_p90: f64) -> Metrics {
        Metrics {
            mape,
            rmse: 0.0,
            mae: 0.0,
            ape_p90,
            holdout_rows: 100,
            mape_threshold: 0.4,
            within_threshold: mape <= 0.4,
        }
    }

    #[test]
    fn test_full_coverage_confidence() {
        let formatter = OutputFormatter::new();
        let result = formatter.format(10_000.0, &Coverage::default(), &metrics(0.2, 0.3), "r1".into(), "v1");
        assert!((result.confidence - 0.8).abs() < 1e-12);
        let interval = result.interval.unwrap();
        assert!((interval.lower - 7_000.0).abs() < 1e-6);
        assert!((interval.upper - 13_000.0).abs() < 1e-6);
        assert!(result.low_confidence_reason.is_none());
        assert_eq!(result.model_version, "v1");
    }

    #[test]
    fn test_penalties_compound() {
        let formatter = OutputFormatter::new();
        let coverage = Coverage {
            unseen_categories: vec!["sector"],
            out_of_range: vec!["net_area", "latitude"],
        };
        let confidence = formatter.confidence(1.0, &coverage);
        assert!((confidence - 0.8 * 0.7 * 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_low_confidence_reason_names_gaps() {
        let formatter = OutputFormatter::new();
        let coverage = Coverage {
            unseen_categories: vec!["sector"],
            out_of_range: vec!["net_usable_area"],
        };
        let result = formatter.format(5_000.0, &coverage, &metrics(0.3, 0.4), "r2".into(), "v1");
        // 0.7 * 0.8 * 0.7 = 0.392
        assert!(result.confidence < 0.5);
        let reason = result.low_confidence_reason.unwrap();
        assert!(reason.contains("sector"));
        assert!(reason.contains("net_usable_area"));
    }

    #[test]
    fn test_interval_widens_and_floors_at_zero() {
        let formatter = OutputFormatter::new();
        let coverage = Coverage {
            unseen_categories: vec!["type", "sector"],
            out_of_range: vec![],
        };
        let result = formatter.format(1_000.0, &coverage, &metrics(0.1, 0.9), "r3".into(), "v1");
        let interval = result.interval.unwrap();
        assert_eq!(interval.lower, 0.0);
        assert!(interval.upper > 1_900.0);
    }

    #[test]
    fn test_poor_model_reports_mape() {
        let formatter = OutputFormatter::new();
        let result = formatter.format(1_000.0, &Coverage::default(), &metrics(0.7, 1.0), "r4".into(), "v1");
        assert!((result.confidence - 0.3).abs() < 1e-12);
        assert!(result.low_confidence_reason.unwrap().contains("MAPE"));
    }
}
