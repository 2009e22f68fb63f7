use anyhow::Result;

use crate::scoring::{NeighborLabSummary, PatientRisk};

use super::generate::format_optional;

/// Optional generative collaborator consulted per alert. Every call may fail;
/// callers fall back to the heuristic for that field.
pub trait Advisor: Sync {
    fn generate_bool(&self, prompt: &str) -> Result<bool>;

    fn generate_score(&self, prompt: &str) -> Result<f64>;

    fn generate_summary(&self, prompt: &str) -> Result<String>;
}

pub fn advisory_prompt(
    patient_id: &str,
    note: &str,
    summary: &NeighborLabSummary,
    risk: &PatientRisk,
) -> String {
    format!(
        "Patient {patient_id} clinical note:\n{note}\n\n\
         Similar patients: {list_len} retrieved, {joined} with lab records.\n\
         Neighbor mean WBC: {wbc}; mean Hemoglobin: {hemoglobin}; mean Creatinine: {creatinine}.\n\
         Heuristic ICU risk score: {score:.3}.\n\
         Assess the likelihood that this patient requires ICU admission.",
        list_len = summary.list_len,
        joined = summary.neighbor_count,
        wbc = format_optional(summary.mean_wbc),
        hemoglobin = format_optional(summary.mean_hemoglobin),
        creatinine = format_optional(summary.mean_creatinine),
        score = risk.heuristic_risk_score,
    )
}
