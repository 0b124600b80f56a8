//! On-disk artifact layout
//!
//! ```text
//! PVAL\n
//! {header json}\n
//! {body json}
//! ```
//!
//! The header is a single JSON line so it can be read without the body.
//! It carries the body length and SHA-256, checked before the body is
//! decoded.

use super::{ArtifactMetadata, ModelArtifact};
use crate::encoder::{FeatureEncoder, TargetEncoder};
use crate::error::ArtifactError;
use crate::schema::FeatureSchema;
use crate::trainer::{GradientBoostedModel, Regressor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::BufRead;
use std::path::Path;

/// Leading bytes of every artifact file
pub const MAGIC: &[u8; 5] = b"PVAL\n";

/// Artifact layout version written by this build
pub const FORMAT_VERSION: u32 = 1;

/// Independently readable artifact header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format_version: u32,
    pub model_version: String,
    pub schema_fingerprint: String,
    pub metadata: ArtifactMetadata,
    pub body_len: u64,
    pub body_sha256: String,
}

#[derive(Serialize)]
struct BodyRef<'a> {
    encoder: &'a TargetEncoder,
    model: &'a GradientBoostedModel,
}

#[derive(Deserialize)]
struct Body {
    encoder: TargetEncoder,
    model: GradientBoostedModel,
}

/// Serialize the body; returns the bytes and their SHA-256
pub(crate) fn encode_body(
    encoder: &TargetEncoder,
    model: &GradientBoostedModel,
) -> Result<(Vec<u8>, String), serde_json::Error> {
    let body = serde_json::to_vec(&BodyRef { encoder, model })?;
    let checksum = compute_checksum(&body);
    Ok((body, checksum))
}

/// Assemble a complete artifact file from a header and an encoded body
pub(crate) fn assemble(header: &ArtifactHeader, body: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let header = serde_json::to_vec(header)?;
    let mut bytes = Vec::with_capacity(MAGIC.len() + header.len() + 1 + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&header);
    bytes.push(b'\n');
    bytes.extend_from_slice(body);
    Ok(bytes)
}

/// Read and check the header from the start of `reader`
///
/// Consumes the magic and the header line, leaving the reader at the body.
pub(crate) fn read_header<R: BufRead>(path: &Path, reader: &mut R) -> Result<ArtifactHeader, ArtifactError> {
    let mut magic = [0u8; MAGIC.len()];
    reader
        .read_exact(&mut magic)
        .map_err(|_| ArtifactError::corrupt(path, "file too short for artifact magic"))?;
    if &magic != MAGIC {
        return Err(ArtifactError::corrupt(path, "missing artifact magic"));
    }

    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| ArtifactError::corrupt(path, format!("unreadable header: {}", e)))?;
    if !line.ends_with('\n') {
        return Err(ArtifactError::corrupt(path, "truncated header"));
    }

    // Check the version before binding the rest of the header to this build's layout
    let raw: serde_json::Value = serde_json::from_str(&line)
        .map_err(|e| ArtifactError::corrupt(path, format!("invalid header: {}", e)))?;
    let found = raw
        .get("format_version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ArtifactError::corrupt(path, "header has no format_version"))?;
    if found != FORMAT_VERSION as u64 {
        return Err(ArtifactError::UnsupportedFormat {
            found: u32::try_from(found).unwrap_or(u32::MAX),
            supported: FORMAT_VERSION,
        });
    }

    // A different schema may also mean a different metadata layout
    let fingerprint = raw
        .get("schema_fingerprint")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ArtifactError::corrupt(path, "header has no schema_fingerprint"))?;
    let expected = &FeatureSchema::current().fingerprint;
    if fingerprint != expected {
        return Err(ArtifactError::SchemaMismatch {
            expected: expected.clone(),
            found: fingerprint.to_string(),
        });
    }

    serde_json::from_value(raw)
        .map_err(|e| ArtifactError::corrupt(path, format!("invalid header: {}", e)))
}

/// Decode a complete artifact
pub(crate) fn decode<R: BufRead>(path: &Path, mut reader: R) -> Result<ModelArtifact, ArtifactError> {
    let header = read_header(path, &mut reader)?;

    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|e| ArtifactError::io(path, e))?;
    if body.len() as u64 != header.body_len {
        return Err(ArtifactError::corrupt(
            path,
            format!("body is {} bytes, header declares {}", body.len(), header.body_len),
        ));
    }
    let checksum = compute_checksum(&body);
    if checksum != header.body_sha256 {
        return Err(ArtifactError::corrupt(
            path,
            format!("checksum mismatch: expected {}, got {}", header.body_sha256, checksum),
        ));
    }

    let Body { encoder, model } = serde_json::from_slice(&body)
        .map_err(|e| ArtifactError::corrupt(path, format!("undecodable body: {}", e)))?;

    if encoder.dimension() != model.n_features() {
        return Err(ArtifactError::corrupt(
            path,
            format!(
                "encoder emits {} features but model expects {}",
                encoder.dimension(),
                model.n_features()
            ),
        ));
    }
    if !model.is_well_formed() {
        return Err(ArtifactError::corrupt(path, "model trees are malformed"));
    }

    Ok(ModelArtifact {
        version: header.model_version,
        path: path.to_path_buf(),
        checksum,
        metadata: header.metadata,
        encoder,
        model,
    })
}

/// Compute SHA256 checksum of data
pub(crate) fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
