use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};
use rusqlite::Connection;
use rusqlite::types::Value;
use tracing::{debug, info, warn};

use crate::model::{LabField, PatientFeature};

use super::schema::{FEATURES_TABLE, table_exists};

/// Read-only snapshot of lab values and ground truth, keyed by patient id.
#[derive(Debug, Clone, Default)]
pub struct FeatureStore {
    rows: BTreeMap<String, PatientFeature>,
}

impl FeatureStore {
    /// Builds the store; the first row seen for a patient id wins.
    pub fn new(rows: impl IntoIterator<Item = PatientFeature>) -> Self {
        let mut map = BTreeMap::<String, PatientFeature>::new();
        for row in rows {
            map.entry(row.patient_id.clone()).or_insert(row);
        }
        Self { rows: map }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, patient_id: &str) -> Option<&PatientFeature> {
        self.rows.get(patient_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatientFeature> + '_ {
        self.rows.values()
    }

    /// Non-null values of one lab field across every patient.
    pub fn column(&self, field: LabField) -> impl Iterator<Item = f64> + '_ {
        self.rows.values().filter_map(move |row| row.lab(field))
    }

    pub fn column_max(&self, field: LabField) -> Option<f64> {
        self.column(field).reduce(f64::max)
    }

    pub fn column_mean(&self, field: LabField) -> Option<f64> {
        let (sum, count) = self
            .column(field)
            .fold((0.0_f64, 0usize), |(sum, count), value| (sum + value, count + 1));
        (count > 0).then(|| sum / count as f64)
    }

    pub fn distinct_ground_truth(&self) -> BTreeSet<bool> {
        self.rows.values().filter_map(|row| row.icu_admit).collect()
    }

    /// Ground truth is informative when both classes occur at least once.
    pub fn ground_truth_is_informative(&self) -> bool {
        self.distinct_ground_truth().len() >= 2
    }
}

pub fn coerce_patient_id(value: &Value) -> Option<String> {
    match value {
        Value::Text(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Integer(number) => Some(number.to_string()),
        Value::Null | Value::Real(_) | Value::Blob(_) => None,
    }
}

/// Note text: null is an empty note, UTF-8 blobs are accepted, and anything
/// else is a coercion failure.
pub fn coerce_note(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Text(text) => Some(text.clone()),
        Value::Blob(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::Integer(_) | Value::Real(_) => None,
    }
}

/// Loose numeric coercion: anything that is not a finite number becomes null.
pub fn coerce_lab_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Integer(number) => *number as f64,
        Value::Real(number) => *number,
        Value::Text(text) => text.trim().parse::<f64>().ok()?,
        Value::Null | Value::Blob(_) => return None,
    };
    number.is_finite().then_some(number)
}

pub fn coerce_ground_truth(value: &Value) -> Option<bool> {
    match value {
        Value::Integer(0) => Some(false),
        Value::Integer(1) => Some(true),
        Value::Real(number) if *number == 0.0 => Some(false),
        Value::Real(number) if *number == 1.0 => Some(true),
        Value::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Text(text) => !text.trim().is_empty(),
        _ => true,
    }
}

pub fn load_feature_store(connection: &Connection) -> Result<FeatureStore> {
    if !table_exists(connection, FEATURES_TABLE)? {
        bail!("input table {FEATURES_TABLE} is missing; load lab features before scoring");
    }

    let mut statement = connection.prepare(
        "
        SELECT patient_id, wbc, hemoglobin, creatinine, icu_admit
        FROM patient_features
        ORDER BY rowid ASC
        ",
    )?;

    let mut rows = statement.query([])?;
    let mut features = Vec::<PatientFeature>::new();
    let mut coercion_failures = 0usize;
    let mut skipped_missing_id = 0usize;

    while let Some(row) = rows.next()? {
        let Some(patient_id) = coerce_patient_id(&row.get::<_, Value>(0)?) else {
            skipped_missing_id += 1;
            continue;
        };

        let mut lab = |index: usize, field: LabField| -> Result<Option<f64>> {
            let raw = row.get::<_, Value>(index)?;
            let coerced = coerce_lab_value(&raw);
            if coerced.is_none() && is_present(&raw) {
                coercion_failures += 1;
                debug!(patient_id = %patient_id, field = field.as_str(), raw = ?raw, "lab value coerced to null");
            }
            Ok(coerced)
        };
        let wbc = lab(1, LabField::Wbc)?;
        let hemoglobin = lab(2, LabField::Hemoglobin)?;
        let creatinine = lab(3, LabField::Creatinine)?;

        let raw_truth = row.get::<_, Value>(4)?;
        let icu_admit = coerce_ground_truth(&raw_truth);
        if icu_admit.is_none() && is_present(&raw_truth) {
            coercion_failures += 1;
            debug!(patient_id = %patient_id, raw = ?raw_truth, "ground truth coerced to null");
        }

        features.push(PatientFeature {
            patient_id,
            wbc,
            hemoglobin,
            creatinine,
            icu_admit,
        });
    }

    let row_count = features.len();
    let store = FeatureStore::new(features);
    if store.len() < row_count {
        warn!(
            duplicates = row_count - store.len(),
            "duplicate feature rows ignored; first row per patient kept"
        );
    }
    if skipped_missing_id > 0 {
        warn!(skipped_missing_id, "feature rows without patient id skipped");
    }

    info!(
        patients = store.len(),
        coercion_failures,
        ground_truth_classes = store.distinct_ground_truth().len(),
        "feature store loaded"
    );
    Ok(store)
}
