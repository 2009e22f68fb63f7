use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientEmbedding {
    pub patient_id: String,
    pub note: String,
    pub embedding: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientFeature {
    pub patient_id: String,
    pub wbc: Option<f64>,
    pub hemoglobin: Option<f64>,
    pub creatinine: Option<f64>,
    pub icu_admit: Option<bool>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabField {
    Wbc,
    Hemoglobin,
    Creatinine,
}

impl LabField {
    pub const ALL: [LabField; 3] = [LabField::Wbc, LabField::Hemoglobin, LabField::Creatinine];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wbc => "wbc",
            Self::Hemoglobin => "hemoglobin",
            Self::Creatinine => "creatinine",
        }
    }
}

impl PatientFeature {
    pub fn lab(&self, field: LabField) -> Option<f64> {
        match field {
            LabField::Wbc => self.wbc,
            LabField::Hemoglobin => self.hemoglobin,
            LabField::Creatinine => self.creatinine,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborMatch {
    pub query_id: String,
    pub neighbor_id: String,
    pub distance: f64,
}

/// Neighbors of one query, nearest first, ties broken by neighbor id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNeighborList {
    pub query_id: String,
    pub neighbors: Vec<NeighborMatch>,
}

impl RankedNeighborList {
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub patient_id: String,
    pub icu_flag: bool,
    pub risk_score: f64,
    pub heuristic_risk_score: f64,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierPrediction {
    pub patient_id: String,
    pub predicted_probability: f64,
}

/// Confusion counts over rows with known ground truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub total_eval: usize,
    pub true_positives: usize,
    pub false_negatives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
}

impl EvaluationReport {
    pub fn record(&mut self, predicted: bool, actual: bool) {
        self.total_eval += 1;
        match (predicted, actual) {
            (true, true) => self.true_positives += 1,
            (false, true) => self.false_negatives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
        }
    }

    pub fn bucket_total(&self) -> usize {
        self.true_positives + self.false_negatives + self.false_positives + self.true_negatives
    }
}
