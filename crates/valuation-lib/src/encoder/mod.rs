//! Feature encoding
//!
//! An encoder is fitted once per training run and then only used to
//! transform records. The fitted state travels inside the artifact so that
//! serving encodes requests exactly as training did.

mod target;

pub use target::{CategoryStats, FeatureRange, TargetEncoder, TargetEncoderConfig};

use crate::error::TrainingError;
use crate::models::{EncodedFeatureVector, PropertyRecord};

/// Something that can be fitted into a [`FeatureEncoder`]
pub trait FitEncoder {
    type Fitted: FeatureEncoder;

    /// Fit encoder state from training records and their labels
    fn fit(&self, rows: &[PropertyRecord], labels: &[f64]) -> Result<Self::Fitted, TrainingError>;
}

/// A fitted, read-only record encoder
pub trait FeatureEncoder: Send + Sync {
    /// Encode a record; never fails, including for unseen categories
    fn transform(&self, record: &PropertyRecord) -> EncodedFeatureVector;

    /// Length of every vector returned by [`FeatureEncoder::transform`]
    fn dimension(&self) -> usize;

    /// How well the fit-time data covers this record
    fn coverage(&self, _record: &PropertyRecord) -> Coverage {
        Coverage::default()
    }
}

/// Parts of a record that fall outside what the encoder saw at fit time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    /// Categorical features whose value was never seen during fit
    pub unseen_categories: Vec<&'static str>,
    /// Numeric features outside the fit-time min/max
    pub out_of_range: Vec<&'static str>,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.unseen_categories.is_empty() && self.out_of_range.is_empty()
    }
}
