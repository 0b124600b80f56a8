//! Gradient-boosted regression trees
//!
//! Each round fits a tree to the negative gradient of the loss at the
//! current ensemble output, then replaces the tree's leaf outputs with the
//! loss-optimal step for the rows in each leaf. Rounds are strictly
//! sequential and the only randomness is the seeded row subsample.

use super::tree::{presort, RegressionTree, TreeParams};
use super::{BoostingConfig, Loss, Regressor};
use crate::error::TrainingError;
use crate::models::EncodedFeatureVector;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Interval (in rounds) between training-loss debug logs
const LOG_EVERY_ROUNDS: usize = 50;

/// Fitted additive ensemble of regression trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedModel {
    init: f64,
    learning_rate: f64,
    n_features: usize,
    loss: Loss,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedModel {
    /// Constant the ensemble starts from (median or mean of the labels)
    pub fn init(&self) -> f64 {
        self.init
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_slice(&self, x: &[f64]) -> f64 {
        self.init
            + self
                .trees
                .iter()
                .map(|tree| self.learning_rate * tree.predict(x))
                .sum::<f64>()
    }

    /// Structural check run after deserializing an artifact body
    pub(crate) fn is_well_formed(&self) -> bool {
        self.init.is_finite()
            && self.learning_rate.is_finite()
            && self.trees.iter().all(|tree| {
                tree.is_well_formed()
                    && tree.max_feature().map_or(true, |f| f < self.n_features)
            })
    }
}

impl Regressor for GradientBoostedModel {
    fn predict(&self, features: &EncodedFeatureVector) -> f64 {
        self.predict_slice(features.as_slice())
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

impl Loss {
    fn initial_estimate(&self, labels: &[f64]) -> f64 {
        match self {
            Loss::SquaredError => mean(labels.iter().copied()),
            Loss::AbsoluteError => median(labels.to_vec()),
        }
    }

    fn negative_gradient(&self, residual: f64) -> f64 {
        match self {
            Loss::SquaredError => residual,
            Loss::AbsoluteError => {
                if residual > 0.0 {
                    1.0
                } else if residual < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Loss-optimal constant step for the residuals of the rows in a leaf
    fn leaf_value(&self, rows: &[usize], residuals: &[f64]) -> f64 {
        let values = rows.iter().map(|&r| residuals[r]);
        match self {
            Loss::SquaredError => mean(values),
            Loss::AbsoluteError => median(values.collect()),
        }
    }

    fn evaluate(&self, residuals: &[f64]) -> f64 {
        match self {
            Loss::SquaredError => mean(residuals.iter().map(|r| r * r)),
            Loss::AbsoluteError => mean(residuals.iter().map(|r| r.abs())),
        }
    }
}

/// Fit an ensemble on encoded rows
///
/// Callers check row counts and label degeneracy; this only requires a
/// non-empty, rectangular feature matrix.
pub(crate) fn fit(
    config: &BoostingConfig,
    features: &[EncodedFeatureVector],
    labels: &[f64],
) -> Result<GradientBoostedModel, TrainingError> {
    if features.len() != labels.len() {
        return Err(TrainingError::ShapeMismatch {
            features: features.len(),
            labels: labels.len(),
        });
    }
    if features.is_empty() {
        return Err(TrainingError::InsufficientData { rows: 0, required: 1 });
    }

    let n = labels.len();
    let n_features = features[0].len();
    if n_features == 0 {
        return Err(TrainingError::InconsistentFeatures { expected: 1, found: 0 });
    }
    if let Some(bad) = features.iter().find(|f| f.len() != n_features) {
        return Err(TrainingError::InconsistentFeatures {
            expected: n_features,
            found: bad.len(),
        });
    }

    let columns: Vec<Vec<f64>> = (0..n_features)
        .map(|j| features.iter().map(|f| f.as_slice()[j]).collect())
        .collect();
    let presorted = presort(&columns);
    let params = TreeParams {
        max_depth: config.max_depth,
        min_samples_split: config.min_samples_split,
        min_samples_leaf: config.min_samples_leaf,
    };

    let loss = config.loss;
    let init = loss.initial_estimate(labels);
    let mut outputs = vec![init; n];
    let mut residuals = vec![0.0; n];
    let mut gradients = vec![0.0; n];
    let mut rng = StdRng::seed_from_u64(config.seed);
    let sample_size = subsample_size(n, config.subsample);
    let mut trees = Vec::with_capacity(config.n_rounds);

    for round in 0..config.n_rounds {
        for i in 0..n {
            residuals[i] = labels[i] - outputs[i];
            gradients[i] = loss.negative_gradient(residuals[i]);
        }

        let sorted = if sample_size < n {
            let mut in_bag = vec![false; n];
            for row in sample(&mut rng, n, sample_size) {
                in_bag[row] = true;
            }
            presorted
                .iter()
                .map(|rows| rows.iter().copied().filter(|&r| in_bag[r]).collect())
                .collect()
        } else {
            presorted.clone()
        };

        let tree = RegressionTree::fit(&columns, &gradients, sorted, params, |rows: &[usize]| {
            loss.leaf_value(rows, &residuals)
        });

        for (i, output) in outputs.iter_mut().enumerate() {
            *output += config.learning_rate * tree.predict_by(|feature| columns[feature][i]);
        }
        trees.push(tree);

        if round % LOG_EVERY_ROUNDS == 0 || round + 1 == config.n_rounds {
            let current: Vec<f64> = labels.iter().zip(&outputs).map(|(y, f)| y - f).collect();
            debug!(
                round = round,
                training_loss = loss.evaluate(&current),
                "Boosting round completed"
            );
        }
    }

    Ok(GradientBoostedModel {
        init,
        learning_rate: config.learning_rate,
        n_features,
        loss,
        trees,
    })
}

fn subsample_size(n: usize, fraction: f64) -> usize {
    if !(fraction > 0.0 && fraction < 1.0) {
        return n;
    }
    ((n as f64 * fraction).round() as usize).clamp(1, n)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub(crate) fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
