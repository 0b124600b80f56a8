//! Artifact management commands

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::Tabled;
use valuation_lib::artifact::ArtifactHeader;
use valuation_lib::{ArtifactSelector, ArtifactStore};

use crate::output::{
    format_bytes, format_percent, format_timestamp, print_error, print_json, print_success,
    print_warning, OutputFormat,
};

/// Row for models table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Trained")]
    trained_at: String,
    #[tabled(rename = "Rows")]
    train_rows: String,
    #[tabled(rename = "MAPE")]
    mape: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Active")]
    active: String,
}

#[derive(Debug, Serialize)]
struct ModelEntry {
    version: String,
    active: bool,
    size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<ArtifactHeader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// List stored artifacts, newest first
pub fn list(store: &ArtifactStore, format: OutputFormat) -> Result<()> {
    let current = store.current_version()?;
    let mut entries: Vec<ModelEntry> = store
        .list_versions()?
        .into_iter()
        .map(|version| {
            let size_bytes = std::fs::metadata(store.artifact_path(&version))
                .map(|m| m.len())
                .unwrap_or(0);
            let (header, error) =
                match store.read_header(&ArtifactSelector::Version(version.clone())) {
                    Ok(header) => (Some(header), None),
                    Err(e) => (None, Some(e.to_string())),
                };
            ModelEntry {
                active: current.as_deref() == Some(version.as_str()),
                version,
                size_bytes,
                header,
                error,
            }
        })
        .collect();
    entries.reverse();

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Table => {
            if entries.is_empty() {
                print_warning(&format!(
                    "No models found in {}",
                    store.config().model_dir.display()
                ));
                return Ok(());
            }

            let rows: Vec<ModelRow> = entries
                .iter()
                .map(|e| ModelRow {
                    version: e.version.clone(),
                    trained_at: e
                        .header
                        .as_ref()
                        .map(|h| format_timestamp(&h.metadata.trained_at))
                        .unwrap_or_else(|| "unreadable".to_string()),
                    train_rows: e
                        .header
                        .as_ref()
                        .map(|h| h.metadata.train_rows.to_string())
                        .unwrap_or_default(),
                    mape: e
                        .header
                        .as_ref()
                        .map(|h| format_percent(h.metadata.metrics.mape))
                        .unwrap_or_default(),
                    size: format_bytes(e.size_bytes),
                    active: if e.active {
                        "✓".to_string()
                    } else {
                        "".to_string()
                    },
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);

            for entry in entries.iter().filter(|e| e.error.is_some()) {
                print_error(&format!(
                    "{}: {}",
                    entry.version,
                    entry.error.as_deref().unwrap_or_default()
                ));
            }
        }
    }

    Ok(())
}

/// Show the header of one artifact (the current one by default)
pub fn inspect(store: &ArtifactStore, version: Option<String>, format: OutputFormat) -> Result<()> {
    let selector = version.map(ArtifactSelector::Version).unwrap_or_default();
    let header = store
        .read_header(&selector)
        .with_context(|| format!("Failed to read {} artifact", selector))?;

    match format {
        OutputFormat::Json => print_json(&header)?,
        OutputFormat::Table => {
            let meta = &header.metadata;
            println!("Version:        {}", header.model_version);
            println!("Format:         v{}", header.format_version);
            println!("Schema:         {}", header.schema_fingerprint);
            println!("Trained:        {}", format_timestamp(&meta.trained_at));
            println!(
                "Rows:           {} train, {} holdout, {} rejected",
                meta.train_rows, meta.holdout_rows, meta.rejected_rows
            );
            println!(
                "Holdout MAPE:   {} (threshold {})",
                format_percent(meta.metrics.mape),
                format_percent(meta.metrics.mape_threshold)
            );
            println!("P90 APE:        {}", format_percent(meta.metrics.ape_p90));
            println!("Features:       {}", meta.feature_names.join(", "));
            println!("Hyperparameters:");
            println!("{}", serde_json::to_string_pretty(&meta.hyperparameters)?);
        }
    }

    Ok(())
}

/// Point the serving pointer at an existing version
pub fn activate(store: &ArtifactStore, version: &str, format: OutputFormat) -> Result<()> {
    let handle = store
        .activate(version)
        .with_context(|| format!("Failed to activate {}", version))?;

    match format {
        OutputFormat::Json => print_json(&handle)?,
        OutputFormat::Table => {
            print_success(&format!("Activated model {}", handle.version));
            println!("Checksum: {}", handle.checksum);
            print_warning("Running servers keep their model until restarted");
        }
    }

    Ok(())
}
