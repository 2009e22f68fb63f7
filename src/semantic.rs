use crate::error::SearchError;
use crate::model::PatientEmbedding;

/// Distance reported when either vector has zero magnitude.
pub const ZERO_MAGNITUDE_DISTANCE: f64 = 1.0;

pub fn dot_product(left: &[f64], right: &[f64]) -> f64 {
    left.iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| left_value * right_value)
        .sum::<f64>()
}

pub fn magnitude(values: &[f64]) -> f64 {
    dot_product(values, values).sqrt()
}

/// Cosine distance from a precomputed dot product and both magnitudes,
/// clamped into `[0, 2]` to absorb rounding at the extremes.
pub fn distance_from_parts(dot: f64, left_norm: f64, right_norm: f64) -> f64 {
    let denominator = left_norm * right_norm;
    if denominator == 0.0 || !denominator.is_finite() {
        return ZERO_MAGNITUDE_DISTANCE;
    }

    let distance = 1.0 - dot / denominator;
    if distance.is_nan() {
        return ZERO_MAGNITUDE_DISTANCE;
    }
    distance.clamp(0.0, 2.0)
}

/// Shared dimensionality of a set of embeddings; `None` for an empty set.
pub fn uniform_dimensions(embeddings: &[PatientEmbedding]) -> Result<Option<usize>, SearchError> {
    let Some(first) = embeddings.first() else {
        return Ok(None);
    };

    let expected = first.embedding.len();
    if let Some(mismatch) = embeddings
        .iter()
        .find(|entry| entry.embedding.len() != expected)
    {
        return Err(SearchError::DimensionMismatch {
            patient_id: mismatch.patient_id.clone(),
            expected,
            actual: mismatch.embedding.len(),
        });
    }

    Ok(Some(expected))
}

pub fn decode_embedding_blob(blob: &[u8]) -> Option<Vec<f64>> {
    if blob.is_empty() || blob.len() % 8 != 0 {
        return None;
    }

    let values = blob
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0_u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect::<Vec<f64>>();

    values.iter().all(|value| value.is_finite()).then_some(values)
}

/// Parses a JSON array of numbers, the text form collaborators may write.
pub fn parse_embedding_text(raw: &str) -> Option<Vec<f64>> {
    let values = serde_json::from_str::<Vec<f64>>(raw.trim()).ok()?;
    if values.is_empty() || values.iter().any(|value| !value.is_finite()) {
        return None;
    }
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::encode_embedding_blob;

    fn embedding(patient_id: &str, values: &[f64]) -> PatientEmbedding {
        PatientEmbedding {
            patient_id: patient_id.to_string(),
            note: String::new(),
            embedding: values.to_vec(),
        }
    }

    fn cosine_distance(left: &[f64], right: &[f64]) -> f64 {
        distance_from_parts(dot_product(left, right), magnitude(left), magnitude(right))
    }

    #[test]
    fn cosine_distance_of_identical_direction_is_zero() {
        assert!(cosine_distance(&[1.0, 2.0], &[2.0, 4.0]).abs() < 1e-12);
    }

    #[test]
    fn cosine_distance_of_opposite_direction_is_two() {
        assert!((cosine_distance(&[1.0, 0.0], &[-3.0, 0.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_vector_yields_sentinel_distance() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), ZERO_MAGNITUDE_DISTANCE);
        assert_eq!(cosine_distance(&[1.0, 0.0], &[0.0, 0.0]), ZERO_MAGNITUDE_DISTANCE);
        assert_eq!(distance_from_parts(1.0, f64::INFINITY, 1.0), ZERO_MAGNITUDE_DISTANCE);
    }

    #[test]
    fn uniform_dimensions_reports_first_offender() {
        let embeddings = vec![
            embedding("P1", &[1.0, 0.0]),
            embedding("P2", &[1.0, 0.0, 0.0]),
        ];

        let err = uniform_dimensions(&embeddings).expect_err("mismatch must fail");
        match err {
            SearchError::DimensionMismatch {
                patient_id,
                expected,
                actual,
            } => {
                assert_eq!(patient_id, "P2");
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn uniform_dimensions_of_empty_set_is_none() {
        assert_eq!(uniform_dimensions(&[]).expect("empty is fine"), None);
    }

    #[test]
    fn embedding_blob_decodes_what_was_encoded() {
        let values = vec![0.25, -1.5, 3.0];
        let blob = encode_embedding_blob(&values);
        assert_eq!(blob.len(), 24);
        assert_eq!(decode_embedding_blob(&blob), Some(values));
    }

    #[test]
    fn embedding_blob_rejects_truncated_input() {
        assert_eq!(decode_embedding_blob(&[0_u8; 12]), None);
        assert_eq!(decode_embedding_blob(&[]), None);
    }

    #[test]
    fn embedding_text_accepts_json_arrays_only() {
        assert_eq!(parse_embedding_text(" [1, 0.5] "), Some(vec![1.0, 0.5]));
        assert_eq!(parse_embedding_text("[]"), None);
        assert_eq!(parse_embedding_text("1,2,3"), None);
    }
}
