use chrono::{TimeZone, Utc};
use rusqlite::params;
use rusqlite::types::Value;

use super::features::{coerce_ground_truth, coerce_lab_value, coerce_note, coerce_patient_id};
use super::schema::table_exists;
use super::test_support::{insert_embedding, insert_feature, insert_feature_values, memory_database};
use super::*;
use crate::error::SearchError;
use crate::model::{Alert, ClassifierPrediction, EvaluationReport, LabField, PatientEmbedding};

fn alert(patient_id: &str, score: f64) -> Alert {
    Alert {
        patient_id: patient_id.to_string(),
        icu_flag: score >= 0.5,
        risk_score: score,
        heuristic_risk_score: score,
        summary: format!("summary {patient_id}"),
        generated_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
    }
}

#[test]
fn coerce_lab_value_turns_unparseable_input_into_null() {
    assert_eq!(coerce_lab_value(&Value::Integer(7)), Some(7.0));
    assert_eq!(coerce_lab_value(&Value::Real(1.25)), Some(1.25));
    assert_eq!(coerce_lab_value(&Value::Text(" 12.5 ".to_string())), Some(12.5));
    assert_eq!(coerce_lab_value(&Value::Text("n/a".to_string())), None);
    assert_eq!(coerce_lab_value(&Value::Text("NaN".to_string())), None);
    assert_eq!(coerce_lab_value(&Value::Blob(vec![1, 2])), None);
    assert_eq!(coerce_lab_value(&Value::Null), None);
}

#[test]
fn coerce_ground_truth_accepts_common_boolean_spellings() {
    assert_eq!(coerce_ground_truth(&Value::Integer(1)), Some(true));
    assert_eq!(coerce_ground_truth(&Value::Integer(0)), Some(false));
    assert_eq!(coerce_ground_truth(&Value::Real(1.0)), Some(true));
    assert_eq!(coerce_ground_truth(&Value::Text("Yes".to_string())), Some(true));
    assert_eq!(coerce_ground_truth(&Value::Text("false".to_string())), Some(false));
    assert_eq!(coerce_ground_truth(&Value::Integer(2)), None);
    assert_eq!(coerce_ground_truth(&Value::Text("maybe".to_string())), None);
}

#[test]
fn coerce_patient_id_accepts_integer_keys() {
    assert_eq!(coerce_patient_id(&Value::Integer(42)), Some("42".to_string()));
    assert_eq!(coerce_patient_id(&Value::Text("  ".to_string())), None);
}

#[test]
fn coerce_note_keeps_text_and_rejects_numbers() {
    assert_eq!(coerce_note(&Value::Text("febrile".to_string())), Some("febrile".to_string()));
    assert_eq!(coerce_note(&Value::Null), Some(String::new()));
    assert_eq!(coerce_note(&Value::Blob(b"dyspnea".to_vec())), Some("dyspnea".to_string()));
    assert_eq!(coerce_note(&Value::Blob(vec![0xff, 0xfe])), None);
    assert_eq!(coerce_note(&Value::Integer(7)), None);
    assert_eq!(coerce_note(&Value::Real(1.5)), None);
}

#[test]
fn load_embedding_store_coerces_loose_notes() {
    let connection = memory_database();
    let vector = "[1.0, 0.0]";
    connection
        .execute(
            "INSERT INTO patient_embeddings(patient_id, note, embedding) VALUES(?1, ?2, ?3)",
            params!["P1", Value::Blob(b"chest pain".to_vec()), vector],
        )
        .expect("insert blob note");
    connection
        .execute(
            "INSERT INTO patient_embeddings(patient_id, note, embedding) VALUES(?1, ?2, ?3)",
            params!["P2", Value::Integer(42), vector],
        )
        .expect("insert numeric note");
    connection
        .execute(
            "INSERT INTO patient_embeddings(patient_id, note, embedding) VALUES(?1, ?2, ?3)",
            params!["P3", Value::Blob(vec![0xff, 0xfe]), vector],
        )
        .expect("insert binary note");

    let store = load_embedding_store(&connection).expect("load embeddings");
    assert_eq!(store.len(), 3);
    assert_eq!(store.get("P1").map(|entry| entry.note.as_str()), Some("chest pain"));
    assert_eq!(store.get("P2").map(|entry| entry.note.as_str()), Some(""));
    assert_eq!(store.get("P3").map(|entry| entry.note.as_str()), Some(""));
}

#[test]
fn load_feature_store_coerces_loose_values() {
    let connection = memory_database();
    insert_feature_values(
        &connection,
        "P1",
        Value::Text("15.5".to_string()),
        Value::Text("n/a".to_string()),
        Value::Integer(3),
        Value::Text("yes".to_string()),
    );
    insert_feature_values(
        &connection,
        "P2",
        Value::Null,
        Value::Real(11.0),
        Value::Blob(vec![0, 1]),
        Value::Text("unknown".to_string()),
    );

    let store = load_feature_store(&connection).expect("load features");
    assert_eq!(store.len(), 2);

    let first = store.get("P1").expect("P1 loaded");
    assert_eq!(first.wbc, Some(15.5));
    assert_eq!(first.hemoglobin, None);
    assert_eq!(first.creatinine, Some(3.0));
    assert_eq!(first.icu_admit, Some(true));

    let second = store.get("P2").expect("P2 loaded");
    assert_eq!(second.wbc, None);
    assert_eq!(second.hemoglobin, Some(11.0));
    assert_eq!(second.creatinine, None);
    assert_eq!(second.icu_admit, None);
}

#[test]
fn feature_store_column_statistics_skip_nulls() {
    let connection = memory_database();
    insert_feature(&connection, "P1", Some(10.0), Some(1.0), Some(true));
    insert_feature(&connection, "P2", None, Some(3.0), Some(true));
    insert_feature(&connection, "P3", Some(20.0), None, None);

    let store = load_feature_store(&connection).expect("load features");
    assert_eq!(store.column_max(LabField::Creatinine), Some(3.0));
    assert_eq!(store.column_mean(LabField::Wbc), Some(15.0));
    assert!(!store.ground_truth_is_informative());
}

#[test]
fn feature_store_keeps_first_row_per_patient() {
    let connection = memory_database();
    insert_feature(&connection, "P1", Some(10.0), None, None);
    insert_feature(&connection, "P1", Some(99.0), None, None);

    let store = load_feature_store(&connection).expect("load features");
    assert_eq!(store.len(), 1);
    assert_eq!(store.get("P1").and_then(|row| row.wbc), Some(10.0));
}

#[test]
fn load_embedding_store_reads_blob_and_json_vectors() {
    let connection = memory_database();
    insert_embedding(&connection, "P2", &[0.0, 1.0]);
    connection
        .execute(
            "INSERT INTO patient_embeddings(patient_id, note, embedding) VALUES(?1, NULL, ?2)",
            params!["P1", "[1.0, 0.0]"],
        )
        .expect("insert json embedding");
    connection
        .execute(
            "INSERT INTO patient_embeddings(patient_id, note, embedding) VALUES('P3', 'x', NULL)",
            [],
        )
        .expect("insert null embedding");

    let store = load_embedding_store(&connection).expect("load embeddings");
    assert_eq!(store.len(), 2);
    assert_eq!(store.dimensions(), Some(2));
    assert_eq!(store.patient_ids(), vec!["P1".to_string(), "P2".to_string()]);
    assert_eq!(store.get("P1").map(|entry| entry.note.as_str()), Some(""));
    assert!(store.get("P3").is_none());
}

#[test]
fn load_embedding_store_fails_on_dimension_mismatch() {
    let connection = memory_database();
    insert_embedding(&connection, "P1", &[1.0, 0.0]);
    insert_embedding(&connection, "P2", &[1.0, 0.0, 0.0]);

    let err = load_embedding_store(&connection).expect_err("mismatch must fail");
    let search_error = err
        .downcast_ref::<SearchError>()
        .expect("root cause should be a search error");
    assert!(matches!(search_error, SearchError::DimensionMismatch { .. }));
}

#[test]
fn load_embedding_store_fails_on_malformed_vector() {
    let connection = memory_database();
    connection
        .execute(
            "INSERT INTO patient_embeddings(patient_id, note, embedding) VALUES('P1', '', 'not a vector')",
            [],
        )
        .expect("insert malformed embedding");

    assert!(load_embedding_store(&connection).is_err());
}

#[test]
fn embedding_store_rejects_duplicate_patients() {
    let entry = PatientEmbedding {
        patient_id: "P1".to_string(),
        note: String::new(),
        embedding: vec![1.0],
    };
    let err = EmbeddingStore::new(vec![entry.clone(), entry]).expect_err("duplicate must fail");
    assert!(matches!(err, SearchError::DuplicatePatient(id) if id == "P1"));
}

#[test]
fn missing_input_table_is_reported() {
    let connection = rusqlite::Connection::open_in_memory().expect("open");
    let err = load_feature_store(&connection).expect_err("missing table must fail");
    assert!(err.to_string().contains("patient_features"));
}

#[test]
fn replace_alerts_overwrites_previous_set() {
    let mut connection = memory_database();
    replace_alerts(&mut connection, "run-1", &[alert("P1", 0.9), alert("P2", 0.2)])
        .expect("first write");
    replace_alerts(&mut connection, "run-2", &[alert("P3", 0.7)]).expect("second write");

    let alerts = load_alerts(&connection).expect("load alerts");
    assert_eq!(alerts, vec![alert("P3", 0.7)]);
    assert_eq!(count_rows(&connection, "icu_alerts").expect("count"), Some(1));
}

#[test]
fn failed_alert_write_leaves_previous_set_visible() {
    let mut connection = memory_database();
    replace_alerts(&mut connection, "run-1", &[alert("P1", 0.9)]).expect("first write");

    let duplicate = [alert("P2", 0.4), alert("P2", 0.4)];
    assert!(replace_alerts(&mut connection, "run-2", &duplicate).is_err());

    let alerts = load_alerts(&connection).expect("load alerts");
    assert_eq!(alerts, vec![alert("P1", 0.9)]);
}

#[test]
fn heuristic_scores_come_from_current_alert_set() {
    let mut connection = memory_database();
    replace_alerts(&mut connection, "run-1", &[alert("P2", 0.3), alert("P1", 0.8)])
        .expect("write alerts");

    let scores = load_heuristic_scores(&connection).expect("load scores");
    assert_eq!(scores.len(), 2);
    assert_eq!(scores.get("P1"), Some(&0.8));
}

#[test]
fn predictions_and_evaluation_are_replaced_wholesale() {
    let mut connection = memory_database();
    let predictions = vec![ClassifierPrediction {
        patient_id: "P1".to_string(),
        predicted_probability: 0.75,
    }];
    replace_predictions(&mut connection, "train-1", &predictions).expect("write predictions");
    replace_predictions(&mut connection, "train-2", &predictions).expect("rewrite predictions");
    assert_eq!(count_rows(&connection, "icu_predictions").expect("count"), Some(1));

    let report = EvaluationReport {
        total_eval: 3,
        true_positives: 1,
        false_negatives: 1,
        false_positives: 0,
        true_negatives: 1,
    };
    let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
    replace_evaluation(&mut connection, "train-1", &report, 0.5, at).expect("write report");
    replace_evaluation(&mut connection, "train-2", &report, 0.5, at).expect("rewrite report");

    let (run_id, loaded) = load_latest_evaluation(&connection)
        .expect("load report")
        .expect("report present");
    assert_eq!(run_id, "train-2");
    assert_eq!(loaded, report);
}

#[test]
fn count_rows_is_none_for_missing_table() {
    let connection = memory_database();
    assert_eq!(count_rows(&connection, "does_not_exist").expect("count"), None);
    assert!(table_exists(&connection, "patient_features").expect("exists"));
}
