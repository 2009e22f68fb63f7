use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::cli::RunArgs;
use crate::commands::{alerts, train};
use crate::model::Alert;
use crate::store::{load_embedding_store, load_feature_store, open_read_write};
use crate::util::{
    ensure_directory, now_utc_string, parse_generated_at, utc_compact_string, write_json_pretty,
};

/// Both stages share one connection and one snapshot of the input stores.
pub fn run(args: RunArgs) -> Result<()> {
    let started_ts = Utc::now();
    let compact = utc_compact_string(started_ts);
    let alert_run_id = format!("alerts-{compact}");
    let train_run_id = format!("train-{compact}");
    let alert_config = args.alert.to_config(&args.rare);
    let trainer_config = args.train.to_config(&args.rare);
    let generated_at = parse_generated_at(args.alert.generated_at.as_deref())?;

    let db_path = args.store.resolved_db_path();
    let manifest_dir = args.store.manifest_dir();
    ensure_directory(&manifest_dir)?;

    info!(db_path = %db_path.display(), run = %compact, "starting full pipeline");

    let mut connection = open_read_write(&db_path)?;
    let embeddings = load_embedding_store(&connection)?;
    let features = load_feature_store(&connection)?;

    let alerts_started_at = now_utc_string();
    let generation = alerts::execute(
        &mut connection,
        &alert_run_id,
        &embeddings,
        &features,
        &alert_config,
        generated_at,
        None,
    )?;
    let alert_manifest = alerts::build_manifest(
        &alert_run_id,
        alerts_started_at,
        generated_at,
        &db_path,
        &alert_config,
        &embeddings,
        &features,
        &generation,
    );
    let alert_manifest_path =
        manifest_dir.join(format!("{}{compact}.json", alerts::MANIFEST_PREFIX));
    write_json_pretty(&alert_manifest_path, &alert_manifest)?;
    info!(path = %alert_manifest_path.display(), "wrote alert run manifest");

    let heuristic_scores = heuristic_scores(&generation.alerts);
    let train_started_at = now_utc_string();
    let stage = train::execute(
        &mut connection,
        &train_run_id,
        &features,
        &heuristic_scores,
        &trainer_config,
        started_ts,
    )?;
    train::write_outputs(
        &manifest_dir,
        started_ts,
        &train_run_id,
        train_started_at,
        &db_path,
        &trainer_config,
        &features,
        heuristic_scores.len(),
        &stage,
    )?;

    info!(
        alerts = generation.alerts.len(),
        predictions = stage.predictions.len(),
        total_eval = stage.evaluation.total_eval,
        "pipeline completed"
    );
    Ok(())
}

pub(crate) fn heuristic_scores(alerts: &[Alert]) -> BTreeMap<String, f64> {
    alerts
        .iter()
        .map(|alert| (alert.patient_id.clone(), alert.heuristic_risk_score))
        .collect()
}
