//! Model training
//!
//! Gradient boosting over regression trees with fixed hyperparameters. There
//! is no early stopping and no search: a given configuration and dataset
//! always produce the same model.

mod boosting;
mod metrics;
mod tree;

pub use boosting::GradientBoostedModel;
pub use metrics::{Metrics, DEFAULT_MAPE_THRESHOLD};
pub use tree::{RegressionTree, TreeNode};

use crate::error::TrainingError;
use crate::models::EncodedFeatureVector;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A fitted model that maps encoded features to a price
pub trait Regressor: Send + Sync {
    fn predict(&self, features: &EncodedFeatureVector) -> f64;

    /// Width of the feature vectors the model was fitted on
    fn n_features(&self) -> usize;
}

/// Loss minimised by the boosting rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    SquaredError,
    AbsoluteError,
}

/// Boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub learning_rate: f64,
    pub n_rounds: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn (without replacement) for each round
    pub subsample: f64,
    pub loss: Loss,
    pub seed: u64,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            n_rounds: 300,
            max_depth: 5,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            loss: Loss::AbsoluteError,
            seed: 42,
        }
    }
}

/// Trainer settings: hyperparameters plus data requirements and gating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub boosting: BoostingConfig,
    /// Fewer valid rows than this (train + holdout) fails the run
    pub min_training_rows: usize,
    /// Share of rows held out when no explicit holdout set is given
    pub holdout_fraction: f64,
    /// MAPE reported as the quality bar in [`Metrics`]
    pub mape_threshold: f64,
    /// When set, a holdout MAPE above this fails the run
    pub mape_gate: Option<f64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            boosting: BoostingConfig::default(),
            min_training_rows: 20,
            holdout_fraction: 0.2,
            mape_threshold: DEFAULT_MAPE_THRESHOLD,
            mape_gate: None,
        }
    }
}

/// Trains [`GradientBoostedModel`]s and evaluates them on a holdout split
#[derive(Debug, Clone, Default)]
pub struct GradientBoostingTrainer {
    config: TrainerConfig,
}

impl GradientBoostingTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train on `features`/`labels`, holding out a seeded random split
    pub fn train(
        &self,
        features: &[EncodedFeatureVector],
        labels: &[f64],
    ) -> Result<(GradientBoostedModel, Metrics), TrainingError> {
        if features.len() != labels.len() {
            return Err(TrainingError::ShapeMismatch {
                features: features.len(),
                labels: labels.len(),
            });
        }
        self.check_row_count(labels.len())?;
        check_not_degenerate(labels)?;

        let (train_idx, holdout_idx) = holdout_split(
            labels.len(),
            self.config.holdout_fraction,
            self.config.boosting.seed,
        );
        let pick = |idx: &[usize]| -> (Vec<EncodedFeatureVector>, Vec<f64>) {
            idx.iter().map(|&i| (features[i].clone(), labels[i])).unzip()
        };
        let (train_x, train_y) = pick(&train_idx);
        let (holdout_x, holdout_y) = pick(&holdout_idx);

        self.train_with_holdout(&train_x, &train_y, &holdout_x, &holdout_y)
    }

    /// Train on an explicit split; metrics come from the holdout rows only
    pub fn train_with_holdout(
        &self,
        train_x: &[EncodedFeatureVector],
        train_y: &[f64],
        holdout_x: &[EncodedFeatureVector],
        holdout_y: &[f64],
    ) -> Result<(GradientBoostedModel, Metrics), TrainingError> {
        if train_x.len() != train_y.len() {
            return Err(TrainingError::ShapeMismatch {
                features: train_x.len(),
                labels: train_y.len(),
            });
        }
        if holdout_x.len() != holdout_y.len() {
            return Err(TrainingError::ShapeMismatch {
                features: holdout_x.len(),
                labels: holdout_y.len(),
            });
        }
        if holdout_y.is_empty() {
            return Err(TrainingError::EmptyHoldout);
        }
        self.check_row_count(train_y.len() + holdout_y.len())?;
        check_not_degenerate(train_y)?;

        let boosting = &self.config.boosting;
        info!(
            train_rows = train_y.len(),
            holdout_rows = holdout_y.len(),
            n_rounds = boosting.n_rounds,
            learning_rate = boosting.learning_rate,
            max_depth = boosting.max_depth,
            loss = ?boosting.loss,
            "Training gradient boosted model"
        );

        let model = boosting::fit(boosting, train_x, train_y)?;
        if let Some(bad) = holdout_x.iter().find(|f| f.len() != model.n_features()) {
            return Err(TrainingError::InconsistentFeatures {
                expected: model.n_features(),
                found: bad.len(),
            });
        }
        let metrics = Metrics::evaluate(&model, holdout_x, holdout_y, self.config.mape_threshold);

        info!(
            mape = metrics.mape,
            rmse = metrics.rmse,
            mae = metrics.mae,
            within_threshold = metrics.within_threshold,
            "Holdout evaluation finished"
        );
        if !metrics.within_threshold {
            warn!(
                mape = metrics.mape,
                threshold = metrics.mape_threshold,
                "Holdout MAPE is above the quality threshold"
            );
        }

        if let Some(gate) = self.config.mape_gate {
            if metrics.mape > gate {
                return Err(TrainingError::MetricGate {
                    mape: metrics.mape,
                    threshold: gate,
                });
            }
        }

        Ok((model, metrics))
    }

    pub(crate) fn check_row_count(&self, rows: usize) -> Result<(), TrainingError> {
        let required = self.config.min_training_rows.max(2);
        if rows < required {
            return Err(TrainingError::InsufficientData { rows, required });
        }
        Ok(())
    }
}

pub(crate) fn check_not_degenerate(labels: &[f64]) -> Result<(), TrainingError> {
    match labels.first() {
        Some(&first) if labels.iter().all(|&y| y == first) => Err(TrainingError::DegenerateLabel {
            rows: labels.len(),
            value: first,
        }),
        _ => Ok(()),
    }
}

/// Seeded split of `0..n` into sorted (train, holdout) index lists
///
/// The holdout keeps at least one row and leaves at least one for training.
pub fn holdout_split(n: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    if n < 2 {
        return ((0..n).collect(), Vec::new());
    }
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
    let holdout_len = ((n as f64 * fraction).round() as usize).clamp(1, n - 1);

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let mut holdout = indices.split_off(n - holdout_len);
    indices.sort_unstable();
    holdout.sort_unstable();
    (indices, holdout)
}
