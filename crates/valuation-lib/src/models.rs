//! Core data models for property valuation

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of property being listed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Apartment,
    House,
    Studio,
}

impl PropertyType {
    pub const ALL: [PropertyType; 3] = [Self::Apartment, Self::House, Self::Studio];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Apartment => "apartment",
            PropertyType::House => "house",
            PropertyType::Studio => "studio",
        }
    }

    /// Parse a listing type, accepting the Spanish labels used by the source listings
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "apartment" | "departamento" => Some(PropertyType::Apartment),
            "house" | "casa" => Some(PropertyType::House),
            "studio" | "estudio" => Some(PropertyType::Studio),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated property listing
///
/// Only constructed by the validator, so every instance satisfies the
/// field bounds declared in [`crate::schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub sector: String,
    pub net_usable_area: f64,
    pub net_area: f64,
    pub n_rooms: u32,
    pub n_bathroom: u32,
    pub latitude: f64,
    pub longitude: f64,
}

/// A property listing as received from a request body or a data file
///
/// Every field is kept as a loose JSON value so the same validation runs
/// for typed JSON numbers and for CSV cells, which arrive as strings.
/// Unknown fields are ignored during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPropertyRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_usable_area: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_area: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_rooms: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_bathroom: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<Value>,
}

impl From<&PropertyRecord> for RawPropertyRecord {
    fn from(record: &PropertyRecord) -> Self {
        Self {
            property_type: Some(Value::from(record.property_type.as_str())),
            sector: Some(Value::from(record.sector.clone())),
            net_usable_area: Some(Value::from(record.net_usable_area)),
            net_area: Some(Value::from(record.net_area)),
            n_rooms: Some(Value::from(record.n_rooms)),
            n_bathroom: Some(Value::from(record.n_bathroom)),
            latitude: Some(Value::from(record.latitude)),
            longitude: Some(Value::from(record.longitude)),
        }
    }
}

/// A raw listing with its (unvalidated) sale price, as yielded by a data source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabeledRow {
    #[serde(flatten)]
    pub record: RawPropertyRecord,
    #[serde(default)]
    pub price: Option<Value>,
}

/// A validated listing with its price label in CLP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub record: PropertyRecord,
    pub price: f64,
}

/// Fixed-length numeric encoding of a [`PropertyRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedFeatureVector(Vec<f64>);

impl EncodedFeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }
}

/// Symmetric-ish uncertainty band around a point estimate, in CLP
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Outcome of a single prediction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub request_id: String,
    /// Point estimate in CLP
    pub prediction: f64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<PredictionInterval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_confidence_reason: Option<String>,
    pub model_version: String,
}
