use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alerts::{Advisor, AlertGeneration, AlertGenerator, seeded_rng};
use crate::cli::AlertArgs;
use crate::config::AlertConfig;
use crate::scoring::NormalizationConstants;
use crate::store::{
    EmbeddingStore, FeatureStore, load_embedding_store, load_feature_store, open_read_write,
    replace_alerts,
};
use crate::util::{
    ensure_directory, now_utc_string, parse_generated_at, utc_compact_string, write_json_pretty,
};

pub const MANIFEST_PREFIX: &str = "alerts_run_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCounts {
    pub embedding_patients: usize,
    pub feature_patients: usize,
    pub queried_patients: usize,
    pub candidate_alerts: usize,
    pub filtered_out: usize,
    pub alerts_written: usize,
    pub advisor_fallbacks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: String,
    pub generated_at: String,
    pub db_path: String,
    pub config: AlertConfig,
    pub normalization: NormalizationConstants,
    pub generation_ms: u64,
    pub counts: AlertCounts,
    pub alert_set_sha256: String,
}

pub fn run(args: AlertArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("alerts-{}", utc_compact_string(started_ts));
    let config = args.alert.to_config(&args.rare);
    let generated_at = parse_generated_at(args.alert.generated_at.as_deref())?;

    let db_path = args.store.resolved_db_path();
    let manifest_dir = args.store.manifest_dir();
    ensure_directory(&manifest_dir)?;

    info!(db_path = %db_path.display(), run_id = %run_id, "starting alert generation");

    let mut connection = open_read_write(&db_path)?;
    let embeddings = load_embedding_store(&connection)?;
    let features = load_feature_store(&connection)?;

    let generation = execute(
        &mut connection,
        &run_id,
        &embeddings,
        &features,
        &config,
        generated_at,
        None,
    )?;

    let manifest = build_manifest(
        &run_id,
        started_at,
        generated_at,
        &db_path,
        &config,
        &embeddings,
        &features,
        &generation,
    );
    let manifest_path = manifest_dir.join(format!(
        "{MANIFEST_PREFIX}{}.json",
        utc_compact_string(started_ts)
    ));
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote alert run manifest");

    Ok(())
}

/// Generates the alert set and replaces the persisted one. Nothing is written
/// when generation fails.
///
/// `advisor` is where a generative collaborator plugs in. The CLI ships
/// without one, so `alerts` and `run` pass `None` and every field comes from
/// the heuristic.
pub(crate) fn execute(
    connection: &mut Connection,
    run_id: &str,
    embeddings: &EmbeddingStore,
    features: &FeatureStore,
    config: &AlertConfig,
    generated_at: DateTime<Utc>,
    advisor: Option<&dyn Advisor>,
) -> Result<AlertGeneration> {
    let mut generator = AlertGenerator::new(embeddings, features, config);
    if let Some(advisor) = advisor {
        generator = generator.with_advisor(advisor);
    }

    let mut rng = seeded_rng(config.sample_seed);
    let generation = generator.generate(&mut rng, generated_at)?;

    let written = replace_alerts(connection, run_id, &generation.alerts)
        .context("failed to persist alert set")?;
    info!(
        run_id,
        alerts = written,
        checksum = %generation.checksum,
        "alert set persisted"
    );

    Ok(generation)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn build_manifest(
    run_id: &str,
    started_at: String,
    generated_at: DateTime<Utc>,
    db_path: &Path,
    config: &AlertConfig,
    embeddings: &EmbeddingStore,
    features: &FeatureStore,
    generation: &AlertGeneration,
) -> AlertRunManifest {
    AlertRunManifest {
        manifest_version: 1,
        run_id: run_id.to_string(),
        status: "completed".to_string(),
        started_at,
        completed_at: now_utc_string(),
        generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        db_path: db_path.display().to_string(),
        config: config.clone(),
        normalization: generation.normalization,
        generation_ms: generation.elapsed_ms,
        counts: AlertCounts {
            embedding_patients: embeddings.len(),
            feature_patients: features.len(),
            queried_patients: generation.queried_patients,
            candidate_alerts: generation.candidate_alerts,
            filtered_out: generation.filtered_out,
            alerts_written: generation.alerts.len(),
            advisor_fallbacks: generation.advisor_fallbacks,
        },
        alert_set_sha256: generation.checksum.clone(),
    }
}
