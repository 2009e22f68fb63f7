use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::alerts::{self, AlertRunManifest};
use crate::commands::train::{self, TrainingRunManifest};
use crate::store::{
    ALERTS_TABLE, EMBEDDINGS_TABLE, EVALUATION_TABLE, FEATURES_TABLE, PREDICTIONS_TABLE,
    count_rows, load_alerts, load_latest_evaluation, open_read_only,
};

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.store.manifest_dir();
    let db_path = args.store.resolved_db_path();

    info!(cache_root = %args.store.cache_root.display(), "status requested");

    match latest_manifest::<AlertRunManifest>(&manifest_dir, alerts::MANIFEST_PREFIX)? {
        Some((path, manifest)) => info!(
            path = %path.display(),
            run_id = %manifest.run_id,
            completed_at = %manifest.completed_at,
            alerts = manifest.counts.alerts_written,
            queried_patients = manifest.counts.queried_patients,
            filter_policy = manifest.config.filter_policy.as_str(),
            selection_policy = manifest.config.selection_policy.as_str(),
            checksum = %manifest.alert_set_sha256,
            "latest alert run"
        ),
        None => warn!(path = %manifest_dir.display(), "no alert run manifest found"),
    }

    match latest_manifest::<TrainingRunManifest>(&manifest_dir, train::MANIFEST_PREFIX)? {
        Some((path, manifest)) => info!(
            path = %path.display(),
            run_id = %manifest.run_id,
            completed_at = %manifest.completed_at,
            training_rows = manifest.counts.training_rows,
            positive_labels = manifest.counts.positive_labels,
            trees = manifest.counts.trees,
            accuracy = manifest.training_metrics.accuracy,
            model_path = %manifest.model_path,
            "latest training run"
        ),
        None => warn!(path = %manifest_dir.display(), "no training run manifest found"),
    }

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = open_read_only(&db_path)?;
    let mut present = Vec::<&str>::new();
    for table in [
        EMBEDDINGS_TABLE,
        FEATURES_TABLE,
        ALERTS_TABLE,
        PREDICTIONS_TABLE,
        EVALUATION_TABLE,
    ] {
        match count_rows(&connection, table)? {
            Some(rows) => {
                info!(table, rows, "table status");
                present.push(table);
            }
            None => warn!(table, "table missing"),
        }
    }

    let alerts = if present.contains(&ALERTS_TABLE) {
        load_alerts(&connection)?
    } else {
        Vec::new()
    };
    if let Some(top) = alerts.first() {
        info!(
            alerts = alerts.len(),
            flagged = alerts.iter().filter(|alert| alert.icu_flag).count(),
            top_patient = %top.patient_id,
            top_risk_score = top.risk_score,
            generated_at = %top.generated_at,
            "stored alert set"
        );
    }

    if !present.contains(&EVALUATION_TABLE) {
        return Ok(());
    }
    if let Some((run_id, report)) = load_latest_evaluation(&connection)? {
        if report.bucket_total() != report.total_eval {
            warn!(
                run_id = %run_id,
                total_eval = report.total_eval,
                bucket_total = report.bucket_total(),
                "evaluation buckets do not add up to the evaluated row count"
            );
        }
        info!(
            run_id = %run_id,
            total_eval = report.total_eval,
            true_positives = report.true_positives,
            false_negatives = report.false_negatives,
            false_positives = report.false_positives,
            true_negatives = report.true_negatives,
            "latest evaluation"
        );
    }

    Ok(())
}

/// Newest manifest with the given file-name prefix. Names embed a compact
/// UTC timestamp, so lexical order is chronological.
pub(crate) fn latest_manifest<T: DeserializeOwned>(
    manifest_dir: &Path,
    prefix: &str,
) -> Result<Option<(PathBuf, T)>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let entries = fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?;
    let mut candidates = Vec::<PathBuf>::new();
    for entry in entries {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix) && name.ends_with(".json"));
        if matches {
            candidates.push(path);
        }
    }
    candidates.sort();

    let Some(path) = candidates.pop() else {
        return Ok(None);
    };
    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest = serde_json::from_slice::<T>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some((path, manifest)))
}
