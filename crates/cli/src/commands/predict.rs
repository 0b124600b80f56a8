//! Prediction command

use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;
use tabled::Tabled;
use valuation_lib::{ArtifactSelector, ArtifactStore, PredictionService, RawPropertyRecord};

use crate::client::{ApiClient, ModelMetadata, PredictResponse};
use crate::output::{
    color_confidence, format_clp, format_percent, format_timestamp, print_json, print_warning,
    OutputFormat,
};

/// A listing as entered on the command line
#[derive(Debug, Clone)]
pub struct Listing {
    pub property_type: String,
    pub sector: String,
    pub net_usable_area: f64,
    pub net_area: f64,
    pub n_rooms: u32,
    pub n_bathroom: u32,
    pub latitude: f64,
    pub longitude: f64,
}

impl Listing {
    pub fn to_record(&self) -> Result<RawPropertyRecord> {
        serde_json::from_value(json!({
            "type": self.property_type,
            "sector": self.sector,
            "net_usable_area": self.net_usable_area,
            "net_area": self.net_area,
            "n_rooms": self.n_rooms,
            "n_bathroom": self.n_bathroom,
            "latitude": self.latitude,
            "longitude": self.longitude,
        }))
        .context("Failed to build property record")
    }
}

/// Where predictions are computed
pub enum Target<'a> {
    /// Load the current artifact from a model directory
    Local { model_dir: PathBuf, model_name: String },
    /// Ask a running server
    Remote(&'a ApiClient),
}

#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Estimate")]
    estimate: String,
    #[tabled(rename = "Range")]
    range: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Model")]
    model_version: String,
}

/// Estimate the price of one listing
pub async fn predict(listing: &Listing, target: Target<'_>, format: OutputFormat) -> Result<()> {
    let record = listing.to_record()?;

    let response = match target {
        Target::Remote(client) => client.predict(&record).await?,
        Target::Local {
            model_dir,
            model_name,
        } => predict_local(&record, model_dir, model_name)?,
    };

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print_prediction(&response),
    }

    Ok(())
}

fn predict_local(
    record: &RawPropertyRecord,
    model_dir: PathBuf,
    model_name: String,
) -> Result<PredictResponse> {
    let store = ArtifactStore::open(&model_dir, model_name);
    let artifact = store
        .load(&ArtifactSelector::Latest)
        .with_context(|| format!("Failed to load model from {}", model_dir.display()))?;
    let service = PredictionService::from_artifact(artifact);

    let request_id = format!("cli-{}", chrono::Utc::now().timestamp_millis());
    let result = service
        .predict(record, request_id)
        .context("Prediction rejected")?;

    let meta = service.metadata();
    Ok(PredictResponse {
        result,
        metadata: Some(ModelMetadata {
            trained_at: meta.trained_at,
            train_rows: meta.train_rows,
            holdout_mape: meta.metrics.mape,
            holdout_rmse: meta.metrics.rmse,
            holdout_mae: meta.metrics.mae,
        }),
    })
}

fn print_prediction(response: &PredictResponse) {
    let result = &response.result;
    let range = result
        .interval
        .map(|i| format!("{} - {}", format_clp(i.lower), format_clp(i.upper)))
        .unwrap_or_else(|| "-".to_string());

    let row = PredictionRow {
        estimate: format_clp(result.prediction),
        range,
        confidence: color_confidence(result.confidence),
        model_version: result.model_version.clone(),
    };
    let table = tabled::Table::new([row])
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);

    if let Some(meta) = &response.metadata {
        println!(
            "Model trained {} on {} rows, holdout MAPE {}",
            format_timestamp(&meta.trained_at),
            meta.train_rows,
            format_percent(meta.holdout_mape)
        );
    }
    if let Some(reason) = &result.low_confidence_reason {
        print_warning(&format!("Low confidence: {}", reason));
    }
}
