use rusqlite::types::Value;
use rusqlite::{Connection, params};

use super::schema::ensure_output_schema;

/// Little-endian `f64` blob, the layout the embedding producer writes.
pub(crate) fn encode_embedding_blob(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 8);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// In-memory database with the upstream input tables and our output tables.
pub(crate) fn memory_database() -> Connection {
    let connection = Connection::open_in_memory().expect("open in-memory database");
    create_input_tables(&connection);
    ensure_output_schema(&connection).expect("create output schema");
    connection
}

/// Input tables are declared without column types so values keep whatever
/// storage class the producer wrote.
pub(crate) fn create_input_tables(connection: &Connection) {
    connection
        .execute_batch(
            "
            CREATE TABLE patient_embeddings (patient_id, note, embedding);
            CREATE TABLE patient_features (patient_id, wbc, hemoglobin, creatinine, icu_admit);
            ",
        )
        .expect("create input tables");
}

pub(crate) fn insert_embedding(connection: &Connection, patient_id: &str, values: &[f64]) {
    connection
        .execute(
            "INSERT INTO patient_embeddings(patient_id, note, embedding) VALUES(?1, ?2, ?3)",
            params![
                patient_id,
                format!("note for {patient_id}"),
                encode_embedding_blob(values)
            ],
        )
        .expect("insert embedding");
}

pub(crate) fn insert_feature_values(
    connection: &Connection,
    patient_id: &str,
    wbc: Value,
    hemoglobin: Value,
    creatinine: Value,
    icu_admit: Value,
) {
    connection
        .execute(
            "
            INSERT INTO patient_features(patient_id, wbc, hemoglobin, creatinine, icu_admit)
            VALUES(?1, ?2, ?3, ?4, ?5)
            ",
            params![patient_id, wbc, hemoglobin, creatinine, icu_admit],
        )
        .expect("insert feature");
}

pub(crate) fn insert_feature(
    connection: &Connection,
    patient_id: &str,
    wbc: Option<f64>,
    creatinine: Option<f64>,
    icu_admit: Option<bool>,
) {
    let real = |value: Option<f64>| value.map(Value::Real).unwrap_or(Value::Null);
    insert_feature_values(
        connection,
        patient_id,
        real(wbc),
        Value::Real(13.0),
        real(creatinine),
        icu_admit
            .map(|flag| Value::Integer(i64::from(flag)))
            .unwrap_or(Value::Null),
    );
}
