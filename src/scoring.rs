use serde::{Deserialize, Serialize};

use crate::config::RarePatternThresholds;
use crate::model::{LabField, PatientFeature, RankedNeighborList};
use crate::store::FeatureStore;

/// Lab picture of one patient's neighbors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborLabSummary {
    /// Length of the neighbor list, joined or not.
    pub list_len: usize,
    /// Neighbors that have a feature record.
    pub neighbor_count: usize,
    pub mean_wbc: Option<f64>,
    pub mean_hemoglobin: Option<f64>,
    pub mean_creatinine: Option<f64>,
    pub rare_pattern_neighbors: usize,
}

pub fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0_f64, 0usize), |(sum, count), value| {
        (sum + value, count + 1)
    });
    (count > 0).then(|| sum / count as f64)
}

/// Left-joins the neighbor list onto the feature store and averages each lab
/// over the neighbors that report it.
pub fn aggregate_neighbors(
    neighbors: &RankedNeighborList,
    features: &FeatureStore,
    rare_pattern: &RarePatternThresholds,
) -> NeighborLabSummary {
    let joined = neighbors
        .neighbors
        .iter()
        .filter_map(|neighbor| features.get(&neighbor.neighbor_id))
        .collect::<Vec<&PatientFeature>>();
    let mean = |field: LabField| mean_of(joined.iter().filter_map(|row| row.lab(field)));

    NeighborLabSummary {
        list_len: neighbors.len(),
        neighbor_count: joined.len(),
        mean_wbc: mean(LabField::Wbc),
        mean_hemoglobin: mean(LabField::Hemoglobin),
        mean_creatinine: mean(LabField::Creatinine),
        rare_pattern_neighbors: joined
            .iter()
            .filter(|row| rare_pattern.matches(row))
            .count(),
    }
}

/// Run-wide maxima used to scale lab values into `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationConstants {
    pub max_creatinine: Option<f64>,
    pub max_wbc: Option<f64>,
}

impl NormalizationConstants {
    pub fn from_store(features: &FeatureStore) -> Self {
        Self {
            max_creatinine: features.column_max(LabField::Creatinine),
            max_wbc: features.column_max(LabField::Wbc),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatientRisk {
    pub heuristic_risk_score: f64,
    pub icu_flag: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskScorer {
    constants: NormalizationConstants,
    threshold: f64,
}

impl RiskScorer {
    pub fn new(constants: NormalizationConstants, threshold: f64) -> Self {
        Self {
            constants,
            threshold,
        }
    }

    pub fn constants(&self) -> NormalizationConstants {
        self.constants
    }

    /// One neighbor's contribution: mean of scaled creatinine, scaled WBC and
    /// similarity. Missing labs count as 0; each term is clamped to `[0, 1]`.
    pub fn component(&self, neighbor: Option<&PatientFeature>, distance: f64) -> f64 {
        let creatinine = normalized_term(
            neighbor.and_then(|row| row.creatinine),
            self.constants.max_creatinine,
        );
        let wbc = normalized_term(neighbor.and_then(|row| row.wbc), self.constants.max_wbc);
        let similarity = (1.0 - distance).clamp(0.0, 1.0);

        (creatinine + wbc + similarity) / 3.0
    }

    pub fn score(&self, neighbors: &RankedNeighborList, features: &FeatureStore) -> PatientRisk {
        let heuristic_risk_score = mean_of(neighbors.neighbors.iter().map(|neighbor| {
            self.component(features.get(&neighbor.neighbor_id), neighbor.distance)
        }))
        .unwrap_or(0.0);

        PatientRisk {
            heuristic_risk_score,
            icu_flag: heuristic_risk_score >= self.threshold,
        }
    }
}

fn normalized_term(value: Option<f64>, max: Option<f64>) -> f64 {
    let denominator = max.unwrap_or(1.0);
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }

    let term = value.unwrap_or(0.0) / denominator;
    if term.is_nan() { 0.0 } else { term.clamp(0.0, 1.0) }
}
