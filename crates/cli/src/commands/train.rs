//! Training command

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tabled::Tabled;
use valuation_lib::data::CsvDataSource;
use valuation_lib::{ArtifactStore, TrainingConfig, TrainingPipeline, TrainingReport};

use crate::output::{format_clp, format_percent, print_json, print_success, print_warning, OutputFormat};

/// Inputs for one training run
pub struct TrainOptions {
    pub train: PathBuf,
    pub test: Option<PathBuf>,
    pub model_dir: PathBuf,
    pub model_name: String,
    pub config: Option<PathBuf>,
    pub mape_gate: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "Metric")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// Load a training configuration file, then apply flag overrides
pub fn training_config(
    path: Option<&Path>,
    mape_gate: Option<f64>,
    seed: Option<u64>,
) -> Result<TrainingConfig> {
    let mut config = match path {
        Some(path) => config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize::<TrainingConfig>())
            .with_context(|| format!("Failed to load training config {}", path.display()))?,
        None => TrainingConfig::default(),
    };

    if let Some(gate) = mape_gate {
        config.trainer.mape_gate = Some(gate);
    }
    if let Some(seed) = seed {
        config.trainer.boosting.seed = seed;
    }
    Ok(config)
}

/// Train a model from CSV files and activate the resulting artifact
pub async fn train(options: TrainOptions, format: OutputFormat) -> Result<()> {
    let config = training_config(options.config.as_deref(), options.mape_gate, options.seed)?;
    let store = ArtifactStore::open(&options.model_dir, &options.model_name);

    let mut source = CsvDataSource::new(&options.train);
    if let Some(test) = &options.test {
        source = source.with_holdout(test);
    }

    let report = tokio::task::spawn_blocking(move || {
        TrainingPipeline::new(config, store).run(&source)
    })
    .await
    .context("Training task panicked")?
    .context("Training failed")?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &TrainingReport) {
    print_success(&format!(
        "Trained and activated model {}",
        report.artifact.version
    ));

    let metrics = &report.metrics;
    let rows = vec![
        ReportRow {
            name: "Train rows",
            value: report.train_rows.to_string(),
        },
        ReportRow {
            name: "Holdout rows",
            value: report.holdout_rows.to_string(),
        },
        ReportRow {
            name: "Rejected rows",
            value: report.rejected_rows.to_string(),
        },
        ReportRow {
            name: "MAPE",
            value: format_percent(metrics.mape),
        },
        ReportRow {
            name: "P90 APE",
            value: format_percent(metrics.ape_p90),
        },
        ReportRow {
            name: "RMSE",
            value: format_clp(metrics.rmse),
        },
        ReportRow {
            name: "MAE",
            value: format_clp(metrics.mae),
        },
        ReportRow {
            name: "Duration",
            value: format!("{:.1}s", report.duration_ms as f64 / 1000.0),
        },
    ];

    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);
    println!("Artifact: {}", report.artifact.path.display());

    for (field, count) in &report.rejections_by_field {
        print_warning(&format!("{} rows rejected on `{}`", count, field));
    }
    if !metrics.within_threshold {
        print_warning(&format!(
            "Holdout MAPE {} exceeds the {} threshold",
            format_percent(metrics.mape),
            format_percent(metrics.mape_threshold)
        ));
    }
}
