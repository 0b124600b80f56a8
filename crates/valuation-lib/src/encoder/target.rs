//! Smoothed target encoding for categorical listing fields
//!
//! Each category is replaced by a blend of its mean price and the global
//! mean price, weighted by how many training rows carry the category.
//! Categories never seen during fit fall back to the global mean.

use super::{Coverage, FeatureEncoder, FitEncoder};
use crate::error::TrainingError;
use crate::models::{EncodedFeatureVector, PropertyRecord};
use crate::schema::{FEATURE_DIMENSION, NUMERIC_FEATURES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Smoothing parameters for target encoding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetEncoderConfig {
    /// Row count at which a category's own mean gets half the weight
    pub min_samples_leaf: f64,
    /// Steepness of the blend between category mean and prior
    pub smoothing: f64,
}

impl Default for TargetEncoderConfig {
    fn default() -> Self {
        Self {
            min_samples_leaf: 20.0,
            smoothing: 10.0,
        }
    }
}

impl TargetEncoderConfig {
    fn blend_weight(&self, count: usize) -> f64 {
        let smoothing = self.smoothing.max(f64::EPSILON);
        1.0 / (1.0 + (-(count as f64 - self.min_samples_leaf) / smoothing).exp())
    }
}

/// Fit-time statistics of one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: usize,
    pub mean: f64,
    pub encoded: f64,
}

/// Observed span of a numeric feature during fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
}

impl FeatureRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Fitted target encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEncoder {
    config: TargetEncoderConfig,
    prior: f64,
    property_types: BTreeMap<String, CategoryStats>,
    sectors: BTreeMap<String, CategoryStats>,
    numeric_ranges: Vec<FeatureRange>,
}

impl FitEncoder for TargetEncoderConfig {
    type Fitted = TargetEncoder;

    fn fit(&self, rows: &[PropertyRecord], labels: &[f64]) -> Result<TargetEncoder, TrainingError> {
        if rows.len() != labels.len() {
            return Err(TrainingError::ShapeMismatch {
                features: rows.len(),
                labels: labels.len(),
            });
        }
        if rows.is_empty() {
            return Err(TrainingError::InsufficientData { rows: 0, required: 1 });
        }

        let prior = ordered_mean(labels.to_vec());

        let mut by_type: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut by_sector: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (row, &label) in rows.iter().zip(labels) {
            by_type
                .entry(row.property_type.as_str().to_string())
                .or_default()
                .push(label);
            by_sector.entry(row.sector.clone()).or_default().push(label);
        }

        let property_types = self.category_stats(by_type, prior);
        let sectors = self.category_stats(by_sector, prior);

        let mut numeric_ranges = vec![
            FeatureRange {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            };
            NUMERIC_FEATURES.len()
        ];
        for row in rows {
            for (range, value) in numeric_ranges.iter_mut().zip(numeric_values(row)) {
                range.min = range.min.min(value);
                range.max = range.max.max(value);
            }
        }

        debug!(
            prior = prior,
            property_types = property_types.len(),
            sectors = sectors.len(),
            "Target encoder fitted"
        );

        Ok(TargetEncoder {
            config: *self,
            prior,
            property_types,
            sectors,
            numeric_ranges,
        })
    }
}

impl TargetEncoderConfig {
    fn category_stats(
        &self,
        groups: BTreeMap<String, Vec<f64>>,
        prior: f64,
    ) -> BTreeMap<String, CategoryStats> {
        groups
            .into_iter()
            .map(|(category, labels)| {
                let count = labels.len();
                let mean = ordered_mean(labels);
                // A single observation is no evidence about the category
                let encoded = if count == 1 {
                    prior
                } else {
                    let weight = self.blend_weight(count);
                    prior * (1.0 - weight) + mean * weight
                };
                (category, CategoryStats { count, mean, encoded })
            })
            .collect()
    }
}

impl TargetEncoder {
    /// Global mean label, used for unseen categories
    pub fn prior(&self) -> f64 {
        self.prior
    }

    pub fn config(&self) -> &TargetEncoderConfig {
        &self.config
    }

    pub fn property_type_stats(&self, value: &str) -> Option<&CategoryStats> {
        self.property_types.get(value)
    }

    pub fn sector_stats(&self, value: &str) -> Option<&CategoryStats> {
        self.sectors.get(value)
    }

    pub fn known_sectors(&self) -> usize {
        self.sectors.len()
    }

    pub fn numeric_ranges(&self) -> impl Iterator<Item = (&'static str, &FeatureRange)> {
        NUMERIC_FEATURES.iter().copied().zip(self.numeric_ranges.iter())
    }

    fn encode_category(&self, table: &BTreeMap<String, CategoryStats>, value: &str) -> f64 {
        table.get(value).map(|s| s.encoded).unwrap_or(self.prior)
    }
}

impl FeatureEncoder for TargetEncoder {
    fn transform(&self, record: &PropertyRecord) -> EncodedFeatureVector {
        let mut values = Vec::with_capacity(FEATURE_DIMENSION);
        values.push(self.encode_category(&self.property_types, record.property_type.as_str()));
        values.push(self.encode_category(&self.sectors, &record.sector));
        values.extend(numeric_values(record));
        EncodedFeatureVector::new(values)
    }

    fn dimension(&self) -> usize {
        FEATURE_DIMENSION
    }

    fn coverage(&self, record: &PropertyRecord) -> Coverage {
        let mut coverage = Coverage::default();
        if !self.property_types.contains_key(record.property_type.as_str()) {
            coverage.unseen_categories.push("type");
        }
        if !self.sectors.contains_key(&record.sector) {
            coverage.unseen_categories.push("sector");
        }
        for ((name, range), value) in self.numeric_ranges().zip(numeric_values(record)) {
            if !range.contains(value) {
                coverage.out_of_range.push(name);
            }
        }
        coverage
    }
}

fn numeric_values(record: &PropertyRecord) -> [f64; 6] {
    [
        record.net_usable_area,
        record.net_area,
        record.n_rooms as f64,
        record.n_bathroom as f64,
        record.latitude,
        record.longitude,
    ]
}

/// Mean computed over sorted values, so the result does not depend on row order
fn ordered_mean(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    values.iter().sum::<f64>() / values.len() as f64
}
