//! Versioned model artifacts
//!
//! An artifact bundles the fitted encoder, the fitted model and the
//! training metadata into one file. A serving process loads exactly one
//! artifact at start-up and never reloads it.

mod format;
mod store;

pub use format::{ArtifactHeader, FORMAT_VERSION, MAGIC};
pub use store::{ArtifactStore, ArtifactStoreConfig};

use crate::encoder::{TargetEncoder, TargetEncoderConfig};
use crate::trainer::{BoostingConfig, GradientBoostedModel, Metrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Facts about the training run that produced an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub train_rows: usize,
    pub holdout_rows: usize,
    /// Rows dropped by validation before training
    pub rejected_rows: usize,
    pub metrics: Metrics,
    pub hyperparameters: BoostingConfig,
    pub encoder: TargetEncoderConfig,
}

/// Reference to a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub version: String,
    pub path: PathBuf,
    /// SHA-256 of the artifact body
    pub checksum: String,
}

/// A fully loaded and verified artifact
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub version: String,
    pub path: PathBuf,
    pub checksum: String,
    pub metadata: ArtifactMetadata,
    pub encoder: TargetEncoder,
    pub model: GradientBoostedModel,
}

impl ModelArtifact {
    pub fn handle(&self) -> ArtifactHandle {
        ArtifactHandle {
            version: self.version.clone(),
            path: self.path.clone(),
            checksum: self.checksum.clone(),
        }
    }
}

/// Which artifact to load
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArtifactSelector {
    /// Whatever the `CURRENT` pointer names
    #[default]
    Latest,
    Version(String),
}

impl FromStr for ArtifactSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("latest") || s.eq_ignore_ascii_case("current") {
            Ok(ArtifactSelector::Latest)
        } else {
            Ok(ArtifactSelector::Version(s.to_string()))
        }
    }
}

impl fmt::Display for ArtifactSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactSelector::Latest => f.write_str("latest"),
            ArtifactSelector::Version(v) => f.write_str(v),
        }
    }
}
