//! End-to-end training run
//!
//! load → validate → split → fit encoder (training rows only) → encode →
//! fit model → evaluate → save. The artifact is written last, so a run
//! that fails at any earlier step leaves the model directory untouched.

use crate::artifact::{ArtifactHandle, ArtifactMetadata, ArtifactStore};
use crate::data::{DataSource, TrainingSet};
use crate::encoder::{FeatureEncoder, FitEncoder, TargetEncoder, TargetEncoderConfig};
use crate::error::PipelineError;
use crate::models::{LabeledRow, PropertyRecord, TrainingExample};
use crate::observability::StructuredLogger;
use crate::schema::{validate_example, FeatureSchema};
use crate::trainer::{
    check_not_degenerate, holdout_split, GradientBoostedModel, GradientBoostingTrainer, Metrics,
    TrainerConfig,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything that parameterises a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub encoder: TargetEncoderConfig,
    pub trainer: TrainerConfig,
}

/// Fitted encoder and model, not yet persisted
#[derive(Debug, Clone)]
pub struct FittedPipeline {
    pub encoder: TargetEncoder,
    pub model: GradientBoostedModel,
    pub metadata: ArtifactMetadata,
}

/// Summary of a completed training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub artifact: ArtifactHandle,
    pub metrics: Metrics,
    pub train_rows: usize,
    pub holdout_rows: usize,
    pub rejected_rows: usize,
    /// Rejected row counts keyed by the field that failed
    pub rejections_by_field: BTreeMap<String, usize>,
    pub duration_ms: u64,
}

/// Runs training against a data source and an artifact store
pub struct TrainingPipeline {
    config: TrainingConfig,
    store: ArtifactStore,
    logger: StructuredLogger,
}

struct ValidatedRows {
    examples: Vec<TrainingExample>,
    rejected: usize,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig, store: ArtifactStore) -> Self {
        Self {
            config,
            store,
            logger: StructuredLogger::new("trainer"),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train on `source` and save the result as the current artifact
    pub fn run(&self, source: &dyn DataSource) -> Result<TrainingReport, PipelineError> {
        let started = Instant::now();
        info!(source = %source.describe(), "Starting training run");

        let set = source.load()?;
        let mut rejections = BTreeMap::new();
        let fitted = self.fit(set, &mut rejections)?;
        let metadata = fitted.metadata.clone();

        let artifact = self.store.save(&fitted.encoder, &fitted.model, fitted.metadata)?;
        self.logger.log_training_completed(
            &artifact.version,
            metadata.train_rows,
            metadata.holdout_rows,
            metadata.rejected_rows,
            &metadata.metrics,
        );

        Ok(TrainingReport {
            artifact,
            metrics: metadata.metrics,
            train_rows: metadata.train_rows,
            holdout_rows: metadata.holdout_rows,
            rejected_rows: metadata.rejected_rows,
            rejections_by_field: rejections,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Fit encoder and model without persisting anything
    pub fn fit(
        &self,
        set: TrainingSet,
        rejections: &mut BTreeMap<String, usize>,
    ) -> Result<FittedPipeline, PipelineError> {
        let trainer = GradientBoostingTrainer::new(self.config.trainer.clone());

        let train = validate_rows(&set.train, "train", rejections);
        let holdout = set
            .holdout
            .as_ref()
            .map(|rows| validate_rows(rows, "holdout", rejections));
        let rejected_rows = train.rejected + holdout.as_ref().map_or(0, |h| h.rejected);

        let (train, holdout) = match holdout {
            Some(holdout) => (train.examples, holdout.examples),
            None => split(train.examples, &self.config.trainer),
        };

        trainer.check_row_count(train.len() + holdout.len())?;
        let (train_records, train_labels) = unzip(train);
        check_not_degenerate(&train_labels)?;
        let (holdout_records, holdout_labels) = unzip(holdout);

        // The encoder must never see holdout labels
        let encoder = self.config.encoder.fit(&train_records, &train_labels)?;
        let train_x: Vec<_> = train_records.iter().map(|r| encoder.transform(r)).collect();
        let holdout_x: Vec<_> = holdout_records.iter().map(|r| encoder.transform(r)).collect();
        debug!(
            dimension = encoder.dimension(),
            known_sectors = encoder.known_sectors(),
            "Encoded training rows"
        );

        let (model, metrics) =
            trainer.train_with_holdout(&train_x, &train_labels, &holdout_x, &holdout_labels)?;

        let metadata = ArtifactMetadata {
            trained_at: Utc::now(),
            feature_names: FeatureSchema::current().feature_names.clone(),
            train_rows: train_labels.len(),
            holdout_rows: holdout_labels.len(),
            rejected_rows,
            metrics,
            hyperparameters: self.config.trainer.boosting.clone(),
            encoder: self.config.encoder,
        };

        Ok(FittedPipeline {
            encoder,
            model,
            metadata,
        })
    }
}

fn validate_rows(
    rows: &[LabeledRow],
    split: &'static str,
    rejections: &mut BTreeMap<String, usize>,
) -> ValidatedRows {
    let mut examples = Vec::with_capacity(rows.len());
    let mut rejected = 0;
    for (line, row) in rows.iter().enumerate() {
        match validate_example(row) {
            Ok(example) => examples.push(example),
            Err(e) => {
                debug!(split = split, row = line, error = %e, "Skipping invalid row");
                *rejections.entry(e.field().to_string()).or_default() += 1;
                rejected += 1;
            }
        }
    }
    if rejected > 0 {
        warn!(
            split = split,
            rejected = rejected,
            kept = examples.len(),
            "Dropped rows that failed validation"
        );
    }
    ValidatedRows { examples, rejected }
}

fn split(
    examples: Vec<TrainingExample>,
    config: &TrainerConfig,
) -> (Vec<TrainingExample>, Vec<TrainingExample>) {
    let (train_idx, holdout_idx) =
        holdout_split(examples.len(), config.holdout_fraction, config.boosting.seed);
    let mut is_holdout = vec![false; examples.len()];
    for i in holdout_idx {
        is_holdout[i] = true;
    }
    debug_assert_eq!(train_idx.len() + is_holdout.iter().filter(|h| **h).count(), examples.len());

    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for (example, held_out) in examples.into_iter().zip(is_holdout) {
        if held_out {
            holdout.push(example);
        } else {
            train.push(example);
        }
    }
    (train, holdout)
}

fn unzip(examples: Vec<TrainingExample>) -> (Vec<PropertyRecord>, Vec<f64>) {
    examples.into_iter().map(|e| (e.record, e.price)).unzip()
}
