use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{AlertConfig, FilterPolicy};
use crate::model::{Alert, RankedNeighborList};
use crate::scoring::{
    NeighborLabSummary, NormalizationConstants, PatientRisk, RiskScorer, aggregate_neighbors,
};
use crate::search::{BruteForceIndex, NeighborIndex, NeighborQuery, batch_query};
use crate::store::{EmbeddingStore, FeatureStore};
use crate::util::sha256_hex;

use super::advisor::{Advisor, advisory_prompt};
use super::select::select_query_patients;

#[derive(Debug, Clone)]
struct AlertCandidate {
    alert: Alert,
    rare_pattern: bool,
    advisor_fallbacks: usize,
}

/// Outcome of one alert run, before persistence.
#[derive(Debug, Clone)]
pub struct AlertGeneration {
    pub alerts: Vec<Alert>,
    pub queried_patients: usize,
    pub candidate_alerts: usize,
    pub filtered_out: usize,
    pub advisor_fallbacks: usize,
    pub normalization: NormalizationConstants,
    pub elapsed_ms: u64,
    pub checksum: String,
}

pub struct AlertGenerator<'a> {
    embeddings: &'a EmbeddingStore,
    features: &'a FeatureStore,
    config: &'a AlertConfig,
    advisor: Option<&'a dyn Advisor>,
}

impl<'a> AlertGenerator<'a> {
    pub fn new(
        embeddings: &'a EmbeddingStore,
        features: &'a FeatureStore,
        config: &'a AlertConfig,
    ) -> Self {
        Self {
            embeddings,
            features,
            config,
            advisor: None,
        }
    }

    pub fn with_advisor(mut self, advisor: &'a dyn Advisor) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Selects query patients, scores them through search, aggregation and
    /// the heuristic, then filters, ranks and caps the set per policy.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        generated_at: DateTime<Utc>,
    ) -> Result<AlertGeneration> {
        let started = Instant::now();
        let selected = select_query_patients(
            &self.embeddings.patient_ids(),
            self.config.sample_size,
            self.config.selection_policy,
            rng,
        );
        let queries = selected
            .iter()
            .filter_map(|patient_id| self.embeddings.get(patient_id))
            .map(|entry| NeighborQuery {
                query_id: entry.patient_id.clone(),
                vector: entry.embedding.clone(),
            })
            .collect::<Vec<NeighborQuery>>();

        let index = BruteForceIndex::from_store(self.embeddings)
            .context("failed to build neighbor index")?;
        if index.is_empty() {
            warn!("embedding store is empty; no query patients to score");
        }
        debug!(
            indexed = index.len(),
            dimensions = index.dimensions().unwrap_or(0),
            queries = queries.len(),
            "neighbor index ready"
        );
        let neighbor_lists = batch_query(&index, &queries, &self.config.search)
            .context("neighbor search failed; no alerts were written")?;

        let normalization = NormalizationConstants::from_store(self.features);
        let scorer = RiskScorer::new(normalization, self.config.alert_threshold);
        let candidates = neighbor_lists
            .iter()
            .map(|neighbors| self.build_candidate(neighbors, &scorer, generated_at))
            .collect::<Vec<AlertCandidate>>();

        let candidate_alerts = candidates.len();
        let advisor_fallbacks = candidates
            .iter()
            .map(|candidate| candidate.advisor_fallbacks)
            .sum::<usize>();

        let (alerts, filtered_out) =
            apply_policy(candidates, self.config.filter_policy, self.config.row_limit);
        let checksum = alert_set_checksum(&alerts)?;

        info!(
            queried_patients = queries.len(),
            candidate_alerts,
            alerts = alerts.len(),
            filter_policy = self.config.filter_policy.as_str(),
            selection_policy = self.config.selection_policy.as_str(),
            "alert set generated"
        );

        Ok(AlertGeneration {
            alerts,
            queried_patients: queries.len(),
            candidate_alerts,
            filtered_out,
            advisor_fallbacks,
            normalization: scorer.constants(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            checksum,
        })
    }

    fn build_candidate(
        &self,
        neighbors: &RankedNeighborList,
        scorer: &RiskScorer,
        generated_at: DateTime<Utc>,
    ) -> AlertCandidate {
        let patient_id = neighbors.query_id.as_str();
        let summary = aggregate_neighbors(neighbors, self.features, &self.config.rare_pattern);
        let risk = scorer.score(neighbors, self.features);
        let own_rare_pattern = self
            .features
            .get(patient_id)
            .is_some_and(|row| self.config.rare_pattern.matches(row));

        let heuristic_summary = describe_neighbors(&summary, &risk);
        let (icu_flag, risk_score, text, advisor_fallbacks) = match self.advisor {
            None => (
                risk.icu_flag,
                risk.heuristic_risk_score,
                heuristic_summary,
                0,
            ),
            Some(advisor) => {
                let note = self
                    .embeddings
                    .get(patient_id)
                    .map(|entry| entry.note.as_str())
                    .unwrap_or_default();
                consult_advisor(
                    advisor,
                    patient_id,
                    &advisory_prompt(patient_id, note, &summary, &risk),
                    &risk,
                    heuristic_summary,
                )
            }
        };

        AlertCandidate {
            alert: Alert {
                patient_id: patient_id.to_string(),
                icu_flag,
                risk_score,
                heuristic_risk_score: risk.heuristic_risk_score,
                summary: text,
                generated_at,
            },
            rare_pattern: own_rare_pattern || summary.rare_pattern_neighbors > 0,
            advisor_fallbacks,
        }
    }
}

fn consult_advisor(
    advisor: &dyn Advisor,
    patient_id: &str,
    prompt: &str,
    risk: &PatientRisk,
    heuristic_summary: String,
) -> (bool, f64, String, usize) {
    let mut fallbacks = 0usize;

    let icu_flag = match advisor.generate_bool(prompt) {
        Ok(flag) => flag,
        Err(err) => {
            warn!(patient_id, error = %err, "advisor flag unavailable; using heuristic");
            fallbacks += 1;
            risk.icu_flag
        }
    };

    let risk_score = match advisor.generate_score(prompt) {
        Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
        Ok(score) => {
            warn!(patient_id, score, "advisor returned a non-finite score; using heuristic");
            fallbacks += 1;
            risk.heuristic_risk_score
        }
        Err(err) => {
            warn!(patient_id, error = %err, "advisor score unavailable; using heuristic");
            fallbacks += 1;
            risk.heuristic_risk_score
        }
    };

    let summary = match advisor.generate_summary(prompt) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            fallbacks += 1;
            heuristic_summary
        }
        Err(err) => {
            warn!(patient_id, error = %err, "advisor summary unavailable; using heuristic");
            fallbacks += 1;
            heuristic_summary
        }
    };

    (icu_flag, risk_score, summary, fallbacks)
}

/// Final alert set plus the number of candidates the rare-pattern filter
/// dropped at its configured position.
fn apply_policy(
    candidates: Vec<AlertCandidate>,
    policy: FilterPolicy,
    row_limit: usize,
) -> (Vec<Alert>, usize) {
    let (ranked, filtered_out) = match policy {
        FilterPolicy::Off => (rank_and_cap(candidates, row_limit), 0),
        FilterPolicy::BeforeRanking => {
            let (kept, dropped) = keep_rare_pattern(candidates);
            (rank_and_cap(kept, row_limit), dropped)
        }
        FilterPolicy::AfterRanking => keep_rare_pattern(rank_and_cap(candidates, row_limit)),
    };

    let alerts = ranked.into_iter().map(|candidate| candidate.alert).collect();
    (alerts, filtered_out)
}

fn keep_rare_pattern(candidates: Vec<AlertCandidate>) -> (Vec<AlertCandidate>, usize) {
    let before = candidates.len();
    let kept = candidates
        .into_iter()
        .filter(|candidate| candidate.rare_pattern)
        .collect::<Vec<AlertCandidate>>();
    let dropped = before - kept.len();
    (kept, dropped)
}

fn rank_and_cap(mut candidates: Vec<AlertCandidate>, row_limit: usize) -> Vec<AlertCandidate> {
    candidates.sort_by(|left, right| {
        right
            .alert
            .risk_score
            .total_cmp(&left.alert.risk_score)
            .then(
                right
                    .alert
                    .heuristic_risk_score
                    .total_cmp(&left.alert.heuristic_risk_score),
            )
            .then(left.alert.patient_id.cmp(&right.alert.patient_id))
    });
    candidates.truncate(row_limit);
    candidates
}

pub fn describe_neighbors(summary: &NeighborLabSummary, risk: &PatientRisk) -> String {
    format!(
        "{} similar patients ({} with labs): mean WBC {}, mean Hemoglobin {}, mean Creatinine {}; heuristic ICU risk {:.3}",
        summary.list_len,
        summary.neighbor_count,
        format_optional(summary.mean_wbc),
        format_optional(summary.mean_hemoglobin),
        format_optional(summary.mean_creatinine),
        risk.heuristic_risk_score,
    )
}

pub(super) fn format_optional(value: Option<f64>) -> String {
    value
        .map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| "n/a".to_string())
}

/// SHA-256 over the serialized alert set; equal inputs give equal digests.
pub fn alert_set_checksum(alerts: &[Alert]) -> Result<String> {
    let bytes = serde_json::to_vec(alerts).context("failed to serialize alert set")?;
    Ok(sha256_hex(&bytes))
}
