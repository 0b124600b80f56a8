//! Filesystem artifact store
//!
//! Artifacts live in one directory as `<model_name>_<version>.pval`, next
//! to a `CURRENT` pointer file naming the active version. Every file is
//! written to a temporary path, synced and renamed into place, so readers
//! never observe a partial artifact or pointer.

use super::format::{self, ArtifactHeader, FORMAT_VERSION};
use super::{ArtifactHandle, ArtifactMetadata, ArtifactSelector, ModelArtifact};
use crate::encoder::TargetEncoder;
use crate::error::ArtifactError;
use crate::schema::FeatureSchema;
use crate::trainer::GradientBoostedModel;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ARTIFACT_EXTENSION: &str = "pval";
const POINTER_FILE: &str = "CURRENT";

/// Configuration for the artifact store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactStoreConfig {
    /// Directory holding artifacts and the `CURRENT` pointer
    pub model_dir: PathBuf,
    /// File name prefix of every artifact
    pub model_name: String,
    /// Number of artifacts kept on disk; the current one is never pruned
    pub versions_to_keep: usize,
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            model_name: "property_valuation_model".to_string(),
            versions_to_keep: 5,
        }
    }
}

/// Saves, lists, activates and loads artifacts in a model directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    config: ArtifactStoreConfig,
}

impl ArtifactStore {
    pub fn new(config: ArtifactStoreConfig) -> Self {
        Self { config }
    }

    /// Store with default retention for `model_name` in `model_dir`
    pub fn open(model_dir: impl Into<PathBuf>, model_name: impl Into<String>) -> Self {
        Self::new(ArtifactStoreConfig {
            model_dir: model_dir.into(),
            model_name: model_name.into(),
            ..ArtifactStoreConfig::default()
        })
    }

    pub fn config(&self) -> &ArtifactStoreConfig {
        &self.config
    }

    pub fn artifact_path(&self, version: &str) -> PathBuf {
        self.config.model_dir.join(format!(
            "{}_{}.{}",
            self.config.model_name, version, ARTIFACT_EXTENSION
        ))
    }

    fn pointer_path(&self) -> PathBuf {
        self.config.model_dir.join(POINTER_FILE)
    }

    /// Persist a fitted pipeline as a new version and make it current
    pub fn save(
        &self,
        encoder: &TargetEncoder,
        model: &GradientBoostedModel,
        metadata: ArtifactMetadata,
    ) -> Result<ArtifactHandle, ArtifactError> {
        fs::create_dir_all(&self.config.model_dir)
            .map_err(|e| ArtifactError::io(&self.config.model_dir, e))?;

        let version = self.next_version();
        let path = self.artifact_path(&version);

        let (body, checksum) = format::encode_body(encoder, model)
            .map_err(|e| ArtifactError::corrupt(&path, format!("failed to encode body: {}", e)))?;
        let header = ArtifactHeader {
            format_version: FORMAT_VERSION,
            model_version: version.clone(),
            schema_fingerprint: FeatureSchema::current().fingerprint.clone(),
            metadata,
            body_len: body.len() as u64,
            body_sha256: checksum.clone(),
        };
        let bytes = format::assemble(&header, &body)
            .map_err(|e| ArtifactError::corrupt(&path, format!("failed to encode header: {}", e)))?;

        write_atomic(&path, &bytes)?;
        self.write_pointer(&version)?;

        info!(
            version = %version,
            path = %path.display(),
            size = bytes.len(),
            checksum = %checksum,
            "Model artifact saved"
        );

        self.prune();

        Ok(ArtifactHandle {
            version,
            path,
            checksum,
        })
    }

    /// Load and fully verify an artifact
    pub fn load(&self, selector: &ArtifactSelector) -> Result<ModelArtifact, ArtifactError> {
        let version = self.resolve(selector)?;
        let artifact = Self::load_path(&self.artifact_path(&version))?;
        if artifact.version != version {
            return Err(ArtifactError::corrupt(
                &artifact.path,
                format!("header names version {}, file name {}", artifact.version, version),
            ));
        }
        Ok(artifact)
    }

    /// Load and verify the artifact at an explicit path
    pub fn load_path(path: &Path) -> Result<ModelArtifact, ArtifactError> {
        let file = open(path)?;
        let artifact = format::decode(path, BufReader::new(file))?;
        debug!(
            version = %artifact.version,
            path = %path.display(),
            "Model artifact loaded"
        );
        Ok(artifact)
    }

    /// Read only the header of a stored version
    pub fn read_header(&self, selector: &ArtifactSelector) -> Result<ArtifactHeader, ArtifactError> {
        let version = self.resolve(selector)?;
        let path = self.artifact_path(&version);
        let mut reader = BufReader::new(open(&path)?);
        format::read_header(&path, &mut reader)
    }

    /// Stored versions, oldest first
    pub fn list_versions(&self) -> Result<Vec<String>, ArtifactError> {
        let entries = match fs::read_dir(&self.config.model_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArtifactError::io(&self.config.model_dir, e)),
        };

        let prefix = format!("{}_", self.config.model_name);
        let suffix = format!(".{}", ARTIFACT_EXTENSION);
        let mut versions: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let version = name.strip_prefix(&prefix)?.strip_suffix(&suffix)?;
                (!version.is_empty()).then(|| version.to_string())
            })
            .collect();
        versions.sort_by(|a, b| version_key(a).cmp(&version_key(b)));
        Ok(versions)
    }

    /// Version named by the `CURRENT` pointer, if any
    pub fn current_version(&self) -> Result<Option<String>, ArtifactError> {
        let path = self.pointer_path();
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let version = contents.trim();
                Ok((!version.is_empty()).then(|| version.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArtifactError::io(path, e)),
        }
    }

    /// Point `CURRENT` at an existing version (rollback or promotion)
    ///
    /// The target artifact is fully verified first; on failure the pointer
    /// is left untouched.
    pub fn activate(&self, version: &str) -> Result<ArtifactHandle, ArtifactError> {
        let artifact = self.load(&ArtifactSelector::Version(version.to_string()))?;
        let previous = self.current_version()?;
        self.write_pointer(version)?;

        info!(
            version = %version,
            previous = previous.as_deref().unwrap_or("none"),
            "Model artifact activated"
        );
        Ok(artifact.handle())
    }

    fn resolve(&self, selector: &ArtifactSelector) -> Result<String, ArtifactError> {
        let version = match selector {
            ArtifactSelector::Version(v) => v.clone(),
            ArtifactSelector::Latest => self.current_version()?.ok_or_else(|| ArtifactError::NotFound {
                location: format!("no {} pointer in {}", POINTER_FILE, self.config.model_dir.display()),
            })?,
        };
        if !is_valid_version(&version) {
            return Err(ArtifactError::InvalidVersion { version });
        }
        let path = self.artifact_path(&version);
        if !path.exists() {
            return Err(ArtifactError::NotFound {
                location: path.display().to_string(),
            });
        }
        Ok(version)
    }

    fn write_pointer(&self, version: &str) -> Result<(), ArtifactError> {
        write_atomic(&self.pointer_path(), format!("{}\n", version).as_bytes())
    }

    fn next_version(&self) -> String {
        let base = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let mut version = base.clone();
        let mut n = 1;
        while self.artifact_path(&version).exists() {
            version = format!("{}_{}", base, n);
            n += 1;
        }
        version
    }

    /// Delete the oldest artifacts beyond `versions_to_keep`
    fn prune(&self) {
        let keep = self.config.versions_to_keep.max(1);
        let (versions, current) = match (self.list_versions(), self.current_version()) {
            (Ok(v), Ok(c)) => (v, c),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Skipping artifact retention");
                return;
            }
        };
        if versions.len() <= keep {
            return;
        }

        let mut excess = versions.len() - keep;
        for version in versions {
            if excess == 0 {
                break;
            }
            if current.as_deref() == Some(version.as_str()) {
                continue;
            }
            let path = self.artifact_path(&version);
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(version = %version, "Pruned old model artifact");
                    excess -= 1;
                }
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove old model artifact"
                ),
            }
        }
    }
}

fn open(path: &Path) -> Result<File, ArtifactError> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ArtifactError::NotFound {
            location: path.display().to_string(),
        },
        _ => ArtifactError::io(path, e),
    })
}

/// Write to a temp file, sync, then rename over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path).map_err(|e| ArtifactError::io(&temp_path, e))?;
    file.write_all(bytes).map_err(|e| ArtifactError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| ArtifactError::io(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| ArtifactError::io(path, e))?;
    Ok(())
}

/// Versions are file name components, never paths
fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && version != "."
        && !version.contains("..")
        && !version.contains(['/', '\\'])
}

/// Sort key for `<timestamp>[_<n>]` versions
fn version_key(version: &str) -> (&str, u64) {
    match version.rsplit_once('_') {
        Some((base, n)) => match n.parse() {
            Ok(n) => (base, n),
            Err(_) => (version, 0),
        },
        None => (version, 0),
    }
}
