use serde::{Deserialize, Serialize};

use crate::model::{LabField, PatientFeature};
use crate::store::FeatureStore;

pub const FEATURE_COUNT: usize = LabField::ALL.len();

/// Column means substituted for missing lab values. A column with no values
/// at all imputes 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImputationMeans {
    pub wbc: f64,
    pub hemoglobin: f64,
    pub creatinine: f64,
}

impl ImputationMeans {
    pub fn from_store(features: &FeatureStore) -> Self {
        let mean = |field: LabField| features.column_mean(field).unwrap_or(0.0);
        Self {
            wbc: mean(LabField::Wbc),
            hemoglobin: mean(LabField::Hemoglobin),
            creatinine: mean(LabField::Creatinine),
        }
    }

    pub fn fill(&self, field: LabField) -> f64 {
        match field {
            LabField::Wbc => self.wbc,
            LabField::Hemoglobin => self.hemoglobin,
            LabField::Creatinine => self.creatinine,
        }
    }

    /// Feature row in `LabField::ALL` order.
    pub fn row(&self, feature: &PatientFeature) -> [f64; FEATURE_COUNT] {
        LabField::ALL.map(|field| feature.lab(field).unwrap_or_else(|| self.fill(field)))
    }
}
