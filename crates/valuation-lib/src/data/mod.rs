//! Training data sources
//!
//! A source yields raw labeled rows; validation happens later in the
//! pipeline so every source is held to the same rules.

mod csv;

pub use self::csv::{CsvDataSource, REQUIRED_COLUMNS};

use crate::error::DataError;
use crate::models::LabeledRow;

/// Rows produced by a [`DataSource`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub train: Vec<LabeledRow>,
    /// Explicit evaluation rows; when absent the pipeline splits `train`
    pub holdout: Option<Vec<LabeledRow>>,
}

impl TrainingSet {
    pub fn total_rows(&self) -> usize {
        self.train.len() + self.holdout.as_ref().map_or(0, Vec::len)
    }
}

/// Supplier of raw training rows
pub trait DataSource {
    fn load(&self) -> Result<TrainingSet, DataError>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Rows held in memory, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    set: TrainingSet,
}

impl InMemoryDataSource {
    pub fn new(train: Vec<LabeledRow>) -> Self {
        Self {
            set: TrainingSet { train, holdout: None },
        }
    }

    pub fn with_holdout(mut self, holdout: Vec<LabeledRow>) -> Self {
        self.set.holdout = Some(holdout);
        self
    }
}

impl DataSource for InMemoryDataSource {
    fn load(&self) -> Result<TrainingSet, DataError> {
        Ok(self.set.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory ({} rows)", self.set.total_rows())
    }
}
