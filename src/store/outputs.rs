use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{Alert, ClassifierPrediction, EvaluationReport};

/// Replaces the whole alert set in one transaction. On error nothing from
/// this run is visible and the previous set stays in place.
pub fn replace_alerts(connection: &mut Connection, run_id: &str, alerts: &[Alert]) -> Result<usize> {
    let tx = connection
        .transaction()
        .context("failed to open alert transaction")?;
    tx.execute("DELETE FROM icu_alerts", [])?;

    {
        let mut statement = tx.prepare(
            "
            INSERT INTO icu_alerts(
              run_id, patient_id, icu_flag, icu_risk_score, heuristic_risk_score, summary, generated_at
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )?;
        for alert in alerts {
            statement
                .execute(params![
                    run_id,
                    alert.patient_id,
                    alert.icu_flag,
                    alert.risk_score,
                    alert.heuristic_risk_score,
                    alert.summary,
                    alert.generated_at,
                ])
                .with_context(|| format!("failed to insert alert for {}", alert.patient_id))?;
        }
    }

    tx.commit().context("failed to commit alert set")?;
    Ok(alerts.len())
}

pub fn replace_predictions(
    connection: &mut Connection,
    run_id: &str,
    predictions: &[ClassifierPrediction],
) -> Result<usize> {
    let tx = connection
        .transaction()
        .context("failed to open prediction transaction")?;
    tx.execute("DELETE FROM icu_predictions", [])?;

    {
        let mut statement = tx.prepare(
            "
            INSERT INTO icu_predictions(run_id, patient_id, predicted_probability)
            VALUES(?1, ?2, ?3)
            ",
        )?;
        for prediction in predictions {
            statement
                .execute(params![
                    run_id,
                    prediction.patient_id,
                    prediction.predicted_probability
                ])
                .with_context(|| {
                    format!("failed to insert prediction for {}", prediction.patient_id)
                })?;
        }
    }

    tx.commit().context("failed to commit prediction set")?;
    Ok(predictions.len())
}

pub fn replace_evaluation(
    connection: &mut Connection,
    run_id: &str,
    report: &EvaluationReport,
    threshold: f64,
    evaluated_at: DateTime<Utc>,
) -> Result<()> {
    let tx = connection
        .transaction()
        .context("failed to open evaluation transaction")?;
    tx.execute("DELETE FROM icu_evaluation", [])?;
    tx.execute(
        "
        INSERT INTO icu_evaluation(
          run_id, total_eval, true_positives, false_negatives, false_positives, true_negatives,
          threshold, evaluated_at
        )
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
        params![
            run_id,
            report.total_eval as i64,
            report.true_positives as i64,
            report.false_negatives as i64,
            report.false_positives as i64,
            report.true_negatives as i64,
            threshold,
            evaluated_at,
        ],
    )?;
    tx.commit().context("failed to commit evaluation report")?;
    Ok(())
}

pub fn load_alerts(connection: &Connection) -> Result<Vec<Alert>> {
    let mut statement = connection.prepare(
        "
        SELECT patient_id, icu_flag, icu_risk_score, heuristic_risk_score, summary, generated_at
        FROM icu_alerts
        ORDER BY icu_risk_score DESC, heuristic_risk_score DESC, patient_id ASC
        ",
    )?;

    let alerts = statement
        .query_map([], |row| {
            Ok(Alert {
                patient_id: row.get(0)?,
                icu_flag: row.get(1)?,
                risk_score: row.get(2)?,
                heuristic_risk_score: row.get(3)?,
                summary: row.get(4)?,
                generated_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<Alert>>>()?;
    Ok(alerts)
}

/// Heuristic scores from the current alert set, keyed by patient id.
pub fn load_heuristic_scores(connection: &Connection) -> Result<BTreeMap<String, f64>> {
    let mut statement = connection.prepare(
        "
        SELECT patient_id, heuristic_risk_score
        FROM icu_alerts
        ORDER BY patient_id ASC
        ",
    )?;

    let scores = statement
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
        .collect::<rusqlite::Result<BTreeMap<String, f64>>>()?;
    Ok(scores)
}

pub fn load_latest_evaluation(connection: &Connection) -> Result<Option<(String, EvaluationReport)>> {
    let report = connection
        .query_row(
            "
            SELECT run_id, total_eval, true_positives, false_negatives, false_positives, true_negatives
            FROM icu_evaluation
            ORDER BY evaluated_at DESC
            LIMIT 1
            ",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    EvaluationReport {
                        total_eval: row.get::<_, i64>(1)? as usize,
                        true_positives: row.get::<_, i64>(2)? as usize,
                        false_negatives: row.get::<_, i64>(3)? as usize,
                        false_positives: row.get::<_, i64>(4)? as usize,
                        true_negatives: row.get::<_, i64>(5)? as usize,
                    },
                ))
            },
        )
        .optional()?;
    Ok(report)
}
