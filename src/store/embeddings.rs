use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use rusqlite::types::Value;
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::model::PatientEmbedding;
use crate::semantic::{decode_embedding_blob, parse_embedding_text, uniform_dimensions};

use super::features::{coerce_note, coerce_patient_id};
use super::schema::{EMBEDDINGS_TABLE, table_exists};

/// Read-only snapshot of patient note embeddings, sorted by patient id.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStore {
    entries: Vec<PatientEmbedding>,
    dimensions: Option<usize>,
}

impl EmbeddingStore {
    pub fn new(mut embeddings: Vec<PatientEmbedding>) -> Result<Self, SearchError> {
        embeddings.sort_by(|left, right| left.patient_id.cmp(&right.patient_id));

        if let Some(pair) = embeddings
            .windows(2)
            .find(|pair| pair[0].patient_id == pair[1].patient_id)
        {
            return Err(SearchError::DuplicatePatient(pair[0].patient_id.clone()));
        }

        let dimensions = uniform_dimensions(&embeddings)?;
        Ok(Self {
            entries: embeddings,
            dimensions,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn entries(&self) -> &[PatientEmbedding] {
        &self.entries
    }

    pub fn get(&self, patient_id: &str) -> Option<&PatientEmbedding> {
        self.entries
            .binary_search_by(|entry| entry.patient_id.as_str().cmp(patient_id))
            .ok()
            .map(|index| &self.entries[index])
    }

    pub fn patient_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.patient_id.clone())
            .collect()
    }
}

pub fn load_embedding_store(connection: &Connection) -> Result<EmbeddingStore> {
    if !table_exists(connection, EMBEDDINGS_TABLE)? {
        bail!("input table {EMBEDDINGS_TABLE} is missing; load embeddings before scoring");
    }

    let mut statement = connection.prepare(
        "
        SELECT patient_id, note, embedding
        FROM patient_embeddings
        ORDER BY patient_id ASC
        ",
    )?;

    let mut rows = statement.query([])?;
    let mut embeddings = Vec::<PatientEmbedding>::new();
    let mut skipped_missing_id = 0usize;
    let mut skipped_missing_vector = 0usize;
    let mut note_coercion_failures = 0usize;

    while let Some(row) = rows.next()? {
        let Some(patient_id) = coerce_patient_id(&row.get::<_, Value>(0)?) else {
            skipped_missing_id += 1;
            continue;
        };
        let raw_note = row.get::<_, Value>(1)?;
        let note = match coerce_note(&raw_note) {
            Some(note) => note,
            None => {
                note_coercion_failures += 1;
                debug!(patient_id = %patient_id, raw = ?raw_note, "note coerced to empty text");
                String::new()
            }
        };

        let embedding = match row.get::<_, Value>(2)? {
            Value::Null => {
                skipped_missing_vector += 1;
                continue;
            }
            Value::Blob(blob) => decode_embedding_blob(&blob),
            Value::Text(text) => parse_embedding_text(&text),
            Value::Integer(_) | Value::Real(_) => None,
        };
        let Some(embedding) = embedding else {
            bail!("embedding for patient '{patient_id}' is not a valid float64 vector");
        };

        embeddings.push(PatientEmbedding {
            patient_id,
            note,
            embedding,
        });
    }

    if skipped_missing_id > 0 || skipped_missing_vector > 0 {
        warn!(
            skipped_missing_id,
            skipped_missing_vector, "embedding rows skipped during load"
        );
    }

    let store = EmbeddingStore::new(embeddings).context("failed to build embedding store")?;
    info!(
        patients = store.len(),
        dimensions = store.dimensions().unwrap_or(0),
        note_coercion_failures,
        "embedding store loaded"
    );
    Ok(store)
}
