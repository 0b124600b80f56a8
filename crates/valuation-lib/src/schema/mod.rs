//! Property record schema and feature layout
//!
//! The schema fixes the field bounds enforced by the validator and the
//! order of the encoded feature vector. Both feed the schema fingerprint
//! stored in every artifact, so a serving binary refuses artifacts trained
//! against a different layout.

mod validator;

pub use validator::{validate_example, validate_record};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Revision of the feature layout; bump when encoding semantics change
pub const SCHEMA_REVISION: u32 = 1;

/// Encoded feature names, in vector order
pub const FEATURE_NAMES: [&str; 8] = [
    "type",
    "sector",
    "net_usable_area",
    "net_area",
    "n_rooms",
    "n_bathroom",
    "latitude",
    "longitude",
];

/// Number of encoded features
pub const FEATURE_DIMENSION: usize = FEATURE_NAMES.len();

/// Features produced by target encoding
pub const CATEGORICAL_FEATURES: [&str; 2] = ["type", "sector"];

/// Features copied from the record unchanged
pub const NUMERIC_FEATURES: [&str; 6] = [
    "net_usable_area",
    "net_area",
    "n_rooms",
    "n_bathroom",
    "latitude",
    "longitude",
];

/// Rooms accepted per listing (inclusive)
pub const N_ROOMS_RANGE: (u32, u32) = (1, 10);

/// Bathrooms accepted per listing (inclusive)
pub const N_BATHROOM_RANGE: (u32, u32) = (1, 5);

/// Continental Chile latitude bounds (inclusive)
pub const LATITUDE_RANGE: (f64, f64) = (-56.0, -17.0);

/// Continental Chile longitude bounds (inclusive)
pub const LONGITUDE_RANGE: (f64, f64) = (-76.0, -66.0);

static CURRENT: OnceLock<FeatureSchema> = OnceLock::new();

/// Description of the feature layout compiled into this binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub revision: u32,
    pub feature_names: Vec<String>,
    pub fingerprint: String,
}

impl FeatureSchema {
    /// The schema this build validates and encodes against
    pub fn current() -> &'static FeatureSchema {
        CURRENT.get_or_init(|| {
            let canonical = canonical_description();
            FeatureSchema {
                revision: SCHEMA_REVISION,
                feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                fingerprint: fingerprint(&canonical),
            }
        })
    }

    pub fn dimension(&self) -> usize {
        self.feature_names.len()
    }

    pub fn matches(&self, fingerprint: &str) -> bool {
        self.fingerprint == fingerprint
    }
}

/// Stable textual form of everything that affects train/serve parity
fn canonical_description() -> String {
    let categorical = CATEGORICAL_FEATURES.join(",");
    let numeric = NUMERIC_FEATURES.join(",");
    let types: Vec<&str> = crate::models::PropertyType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect();

    format!(
        "revision={};features={};categorical={}:target;numeric={}:passthrough;types={};\
         n_rooms=[{},{}];n_bathroom=[{},{}];latitude=[{},{}];longitude=[{},{}];areas=(0,inf)",
        SCHEMA_REVISION,
        FEATURE_NAMES.join(","),
        categorical,
        numeric,
        types.join("|"),
        N_ROOMS_RANGE.0,
        N_ROOMS_RANGE.1,
        N_BATHROOM_RANGE.0,
        N_BATHROOM_RANGE.1,
        LATITUDE_RANGE.0,
        LATITUDE_RANGE.1,
        LONGITUDE_RANGE.0,
        LONGITUDE_RANGE.1,
    )
}

fn fingerprint(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = FeatureSchema::current();
        let b = fingerprint(&canonical_description());
        assert_eq!(a.fingerprint, b);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn test_feature_layout() {
        let schema = FeatureSchema::current();
        assert_eq!(schema.dimension(), FEATURE_DIMENSION);
        assert_eq!(
            CATEGORICAL_FEATURES.len() + NUMERIC_FEATURES.len(),
            FEATURE_DIMENSION
        );
        assert_eq!(schema.feature_names[0], "type");
        assert_eq!(schema.feature_names[7], "longitude");
    }

    #[test]
    fn test_fingerprint_changes_with_description() {
        let base = canonical_description();
        assert_ne!(fingerprint(&base), fingerprint(&format!("{base};extra")));
    }
}
