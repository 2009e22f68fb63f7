//! Supervised baseline: fallback-chain labels, mean imputation and a
//! gradient-boosted tree classifier over the three lab features.

mod boosting;
mod labels;
mod matrix;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TrainerConfig;
use crate::evaluate::{TrainingMetrics, training_metrics};
use crate::model::{ClassifierPrediction, LabField};
use crate::store::FeatureStore;

pub use boosting::{GradientBoostedClassifier, TreeNode};
pub use labels::{LabelSource, TrainingLabel, build_training_labels, label_source_counts};
pub use matrix::ImputationMeans;

/// Everything needed to reproduce predictions: imputation means and trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub feature_names: Vec<String>,
    pub imputation: ImputationMeans,
    pub classifier: GradientBoostedClassifier,
}

impl TrainedModel {
    pub fn predict(&self, features: &FeatureStore) -> Vec<ClassifierPrediction> {
        features
            .iter()
            .map(|feature| ClassifierPrediction {
                patient_id: feature.patient_id.clone(),
                predicted_probability: self
                    .classifier
                    .predict_proba(&self.imputation.row(feature)),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub labels: Vec<TrainingLabel>,
    pub label_sources: BTreeMap<LabelSource, usize>,
    pub model: TrainedModel,
    pub metrics: TrainingMetrics,
}

pub struct ClassifierTrainer<'a> {
    config: &'a TrainerConfig,
}

impl<'a> ClassifierTrainer<'a> {
    pub fn new(config: &'a TrainerConfig) -> Self {
        Self { config }
    }

    /// Labels every patient, fits the classifier and scores it against its
    /// own training labels.
    pub fn train(
        &self,
        features: &FeatureStore,
        heuristic_scores: &BTreeMap<String, f64>,
    ) -> Result<TrainingOutcome> {
        let labels = build_training_labels(
            features,
            heuristic_scores,
            self.config.label_heuristic_threshold,
            self.config.rare_pattern,
        );
        let label_sources = label_source_counts(&labels);

        let imputation = ImputationMeans::from_store(features);
        let rows = features
            .iter()
            .map(|feature| imputation.row(feature).to_vec())
            .collect::<Vec<Vec<f64>>>();
        let targets = labels.iter().map(|entry| entry.label).collect::<Vec<bool>>();

        let classifier = GradientBoostedClassifier::fit(&rows, &targets, &self.config.boosting)
            .context("failed to train ICU classifier")?;
        let model = TrainedModel {
            feature_names: LabField::ALL
                .iter()
                .map(|field| field.as_str().to_string())
                .collect(),
            imputation,
            classifier,
        };

        let scored = rows
            .iter()
            .zip(&targets)
            .map(|(row, label)| (model.classifier.predict_proba(row), *label))
            .collect::<Vec<(f64, bool)>>();
        let metrics = training_metrics(&scored, self.config.decision_threshold);

        info!(
            rows = labels.len(),
            positives = targets.iter().filter(|label| **label).count(),
            trees = model.classifier.trees.len(),
            max_depth = model.classifier.trees.iter().map(TreeNode::depth).max().unwrap_or(0),
            converged = model.classifier.converged,
            accuracy = metrics.accuracy,
            "classifier trained"
        );

        Ok(TrainingOutcome {
            labels,
            label_sources,
            model,
            metrics,
        })
    }
}
