use serde::{Deserialize, Serialize};

use crate::model::{ClassifierPrediction, EvaluationReport};
use crate::store::FeatureStore;

const LOG_LOSS_EPSILON: f64 = 1e-15;

/// Confusion counts at `threshold` over predictions whose patient has known
/// ground truth. Rows without ground truth are skipped entirely.
pub fn evaluate_predictions(
    predictions: &[ClassifierPrediction],
    features: &FeatureStore,
    threshold: f64,
) -> EvaluationReport {
    predictions
        .iter()
        .filter_map(|prediction| {
            features
                .get(&prediction.patient_id)
                .and_then(|feature| feature.icu_admit)
                .map(|actual| (prediction.predicted_probability >= threshold, actual))
        })
        .fold(EvaluationReport::default(), |mut report, (predicted, actual)| {
            report.record(predicted, actual);
            report
        })
}

/// Fit quality of the classifier on its own training labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub evaluated_rows: usize,
    pub accuracy: f64,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub log_loss: f64,
    /// `None` when only one class is present.
    pub roc_auc: Option<f64>,
}

pub fn training_metrics(scored: &[(f64, bool)], threshold: f64) -> TrainingMetrics {
    let confusion = scored
        .iter()
        .fold(EvaluationReport::default(), |mut report, (probability, actual)| {
            report.record(*probability >= threshold, *actual);
            report
        });

    let precision = ratio(
        confusion.true_positives,
        confusion.true_positives + confusion.false_positives,
    );
    let recall = ratio(
        confusion.true_positives,
        confusion.true_positives + confusion.false_negatives,
    );
    let f1 = match (precision, recall) {
        (Some(precision), Some(recall)) if precision + recall > 0.0 => {
            Some(2.0 * precision * recall / (precision + recall))
        }
        _ => None,
    };

    TrainingMetrics {
        evaluated_rows: scored.len(),
        accuracy: ratio(
            confusion.true_positives + confusion.true_negatives,
            confusion.total_eval,
        )
        .unwrap_or(0.0),
        precision,
        recall,
        f1,
        log_loss: log_loss(scored),
        roc_auc: roc_auc(scored),
    }
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

fn log_loss(scored: &[(f64, bool)]) -> f64 {
    if scored.is_empty() {
        return 0.0;
    }
    let total = scored
        .iter()
        .map(|(probability, actual)| {
            let probability = probability.clamp(LOG_LOSS_EPSILON, 1.0 - LOG_LOSS_EPSILON);
            if *actual {
                -probability.ln()
            } else {
                -(1.0 - probability).ln()
            }
        })
        .sum::<f64>();
    total / scored.len() as f64
}

/// Mann-Whitney AUC with tied scores sharing their average rank.
fn roc_auc(scored: &[(f64, bool)]) -> Option<f64> {
    let positives = scored.iter().filter(|(_, actual)| *actual).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut ordered = scored.to_vec();
    ordered.sort_by(|left, right| left.0.total_cmp(&right.0));

    let mut positive_rank_sum = 0.0;
    let mut start = 0usize;
    while start < ordered.len() {
        let mut end = start + 1;
        while end < ordered.len() && ordered[end].0 == ordered[start].0 {
            end += 1;
        }
        // Ranks are 1-based; the tie group spans ranks start+1..=end.
        let average_rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = ordered[start..end]
            .iter()
            .filter(|(_, actual)| *actual)
            .count();
        positive_rank_sum += average_rank * tied_positives as f64;
        start = end;
    }

    let positives = positives as f64;
    let negatives = negatives as f64;
    Some((positive_rank_sum - positives * (positives + 1.0) / 2.0) / (positives * negatives))
}
