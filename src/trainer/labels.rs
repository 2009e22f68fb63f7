use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RarePatternThresholds;
use crate::model::PatientFeature;
use crate::store::FeatureStore;

/// Which rule of the fallback chain produced a training label.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    GroundTruth,
    HeuristicScore,
    Creatinine,
    Wbc,
    Default,
}

impl LabelSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GroundTruth => "ground_truth",
            Self::HeuristicScore => "heuristic_score",
            Self::Creatinine => "creatinine",
            Self::Wbc => "wbc",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLabel {
    pub patient_id: String,
    pub label: bool,
    pub source: LabelSource,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelRules {
    pub use_ground_truth: bool,
    pub heuristic_threshold: f64,
    pub rare_pattern: RarePatternThresholds,
}

/// First non-null rule wins. This chain stands in for missing ground truth;
/// it is a pragmatic heuristic, not a clinical rule.
pub fn resolve_label(
    feature: &PatientFeature,
    heuristic_score: Option<f64>,
    rules: &LabelRules,
) -> (bool, LabelSource) {
    if rules.use_ground_truth {
        if let Some(actual) = feature.icu_admit {
            return (actual, LabelSource::GroundTruth);
        }
    }
    if let Some(score) = heuristic_score {
        return (score >= rules.heuristic_threshold, LabelSource::HeuristicScore);
    }
    if let Some(creatinine) = feature.creatinine {
        return (creatinine > rules.rare_pattern.creatinine, LabelSource::Creatinine);
    }
    if let Some(wbc) = feature.wbc {
        return (wbc > rules.rare_pattern.wbc, LabelSource::Wbc);
    }
    (false, LabelSource::Default)
}

/// Labels every patient in the feature store. Ground truth only participates
/// when the column holds both classes somewhere in the store.
pub fn build_training_labels(
    features: &FeatureStore,
    heuristic_scores: &BTreeMap<String, f64>,
    heuristic_threshold: f64,
    rare_pattern: RarePatternThresholds,
) -> Vec<TrainingLabel> {
    let rules = LabelRules {
        use_ground_truth: features.ground_truth_is_informative(),
        heuristic_threshold,
        rare_pattern,
    };

    let labels = features
        .iter()
        .map(|feature| {
            let (label, source) = resolve_label(
                feature,
                heuristic_scores.get(&feature.patient_id).copied(),
                &rules,
            );
            TrainingLabel {
                patient_id: feature.patient_id.clone(),
                label,
                source,
            }
        })
        .collect::<Vec<TrainingLabel>>();

    let positives = labels.iter().filter(|entry| entry.label).count();
    if !labels.is_empty() && (positives == 0 || positives == labels.len()) {
        warn!(
            rows = labels.len(),
            positives, "training labels contain a single class"
        );
    }

    labels
}

pub fn label_source_counts(labels: &[TrainingLabel]) -> BTreeMap<LabelSource, usize> {
    labels.iter().fold(BTreeMap::new(), |mut counts, entry| {
        *counts.entry(entry.source).or_insert(0) += 1;
        counts
    })
}
