use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cli::TrainArgs;
use crate::config::TrainerConfig;
use crate::evaluate::{TrainingMetrics, evaluate_predictions};
use crate::model::{ClassifierPrediction, EvaluationReport};
use crate::store::{
    FeatureStore, load_feature_store, load_heuristic_scores, open_read_write, replace_evaluation,
    replace_predictions,
};
use crate::trainer::{ClassifierTrainer, ImputationMeans, TrainedModel, TrainingOutcome};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub const MANIFEST_PREFIX: &str = "training_run_";
pub const MODEL_PREFIX: &str = "classifier_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingCounts {
    pub feature_patients: usize,
    pub heuristic_scores: usize,
    pub training_rows: usize,
    pub positive_labels: usize,
    pub label_sources: BTreeMap<String, usize>,
    pub trees: usize,
    pub predictions_written: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: String,
    pub db_path: String,
    pub model_path: String,
    pub config: TrainerConfig,
    pub imputation: ImputationMeans,
    pub converged: bool,
    pub counts: TrainingCounts,
    pub training_metrics: TrainingMetrics,
    pub evaluation: EvaluationReport,
}

/// Result of the train, predict and evaluate stages.
#[derive(Debug, Clone)]
pub struct TrainingStage {
    pub training: TrainingOutcome,
    pub predictions: Vec<ClassifierPrediction>,
    pub evaluation: EvaluationReport,
}

pub fn run(args: TrainArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("train-{}", utc_compact_string(started_ts));
    let config = args.train.to_config(&args.rare);

    let db_path = args.store.resolved_db_path();
    let manifest_dir = args.store.manifest_dir();
    ensure_directory(&manifest_dir)?;

    info!(db_path = %db_path.display(), run_id = %run_id, "starting classifier training");

    let mut connection = open_read_write(&db_path)?;
    let features = load_feature_store(&connection)?;
    let heuristic_scores =
        load_heuristic_scores(&connection).context("failed to read heuristic scores")?;
    if heuristic_scores.is_empty() {
        warn!("no persisted alert set; labels fall back to lab rules");
    }

    let stage = execute(
        &mut connection,
        &run_id,
        &features,
        &heuristic_scores,
        &config,
        started_ts,
    )?;

    write_outputs(
        &manifest_dir,
        started_ts,
        &run_id,
        started_at,
        &db_path,
        &config,
        &features,
        heuristic_scores.len(),
        &stage,
    )
}

/// Trains, predicts every patient, evaluates against ground truth and
/// replaces the persisted predictions and report.
pub(crate) fn execute(
    connection: &mut Connection,
    run_id: &str,
    features: &FeatureStore,
    heuristic_scores: &BTreeMap<String, f64>,
    config: &TrainerConfig,
    evaluated_at: DateTime<Utc>,
) -> Result<TrainingStage> {
    let training = ClassifierTrainer::new(config).train(features, heuristic_scores)?;

    let predictions = training.model.predict(features);
    let written = replace_predictions(connection, run_id, &predictions)
        .context("failed to persist predictions")?;

    let evaluation = evaluate_predictions(&predictions, features, config.decision_threshold);
    replace_evaluation(
        connection,
        run_id,
        &evaluation,
        config.decision_threshold,
        evaluated_at,
    )
    .context("failed to persist evaluation report")?;

    info!(
        run_id,
        predictions = written,
        total_eval = evaluation.total_eval,
        true_positives = evaluation.true_positives,
        false_negatives = evaluation.false_negatives,
        false_positives = evaluation.false_positives,
        true_negatives = evaluation.true_negatives,
        "predictions evaluated"
    );
    if evaluation.total_eval == 0 {
        warn!("no patient has ground truth; evaluation report is empty");
    }

    Ok(TrainingStage {
        training,
        predictions,
        evaluation,
    })
}

/// Writes the model artifact and the run manifest next to it.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_outputs(
    manifest_dir: &Path,
    started_ts: DateTime<Utc>,
    run_id: &str,
    started_at: String,
    db_path: &Path,
    config: &TrainerConfig,
    features: &FeatureStore,
    heuristic_scores: usize,
    stage: &TrainingStage,
) -> Result<()> {
    let compact = utc_compact_string(started_ts);
    let model_path = manifest_dir.join(format!("{MODEL_PREFIX}{compact}.json"));
    write_json_pretty(&model_path, &stage.training.model)?;
    info!(path = %model_path.display(), "wrote classifier model");

    let manifest = build_manifest(
        run_id,
        started_at,
        db_path,
        model_path,
        config,
        features,
        heuristic_scores,
        stage,
    );
    let manifest_path = manifest_dir.join(format!("{MANIFEST_PREFIX}{compact}.json"));
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote training run manifest");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_manifest(
    run_id: &str,
    started_at: String,
    db_path: &Path,
    model_path: PathBuf,
    config: &TrainerConfig,
    features: &FeatureStore,
    heuristic_scores: usize,
    stage: &TrainingStage,
) -> TrainingRunManifest {
    let training = &stage.training;
    let model: &TrainedModel = &training.model;

    TrainingRunManifest {
        manifest_version: 1,
        run_id: run_id.to_string(),
        status: "completed".to_string(),
        started_at,
        completed_at: now_utc_string(),
        db_path: db_path.display().to_string(),
        model_path: model_path.display().to_string(),
        config: config.clone(),
        imputation: model.imputation,
        converged: model.classifier.converged,
        counts: TrainingCounts {
            feature_patients: features.len(),
            heuristic_scores,
            training_rows: training.labels.len(),
            positive_labels: training.labels.iter().filter(|entry| entry.label).count(),
            label_sources: training
                .label_sources
                .iter()
                .map(|(source, count)| (source.as_str().to_string(), *count))
                .collect(),
            trees: model.classifier.trees.len(),
            predictions_written: stage.predictions.len(),
        },
        training_metrics: training.metrics,
        evaluation: stage.evaluation,
    }
}
