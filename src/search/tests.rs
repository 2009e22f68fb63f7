use std::sync::atomic::AtomicBool;

use super::batch::batch_query_with_cancel;
use super::index::{QueryBudget, ScanGuard};
use super::*;
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::model::PatientEmbedding;

fn embedding(patient_id: &str, values: &[f64]) -> PatientEmbedding {
    PatientEmbedding {
        patient_id: patient_id.to_string(),
        note: String::new(),
        embedding: values.to_vec(),
    }
}

fn three_patient_index() -> BruteForceIndex {
    BruteForceIndex::build(&[
        embedding("P1", &[1.0, 0.0]),
        embedding("P2", &[0.0, 1.0]),
        embedding("P3", &[0.9, 0.1]),
    ])
    .expect("build index")
}

fn config(top_k: usize, workers: usize, exclude_self: bool) -> SearchConfig {
    SearchConfig {
        top_k,
        workers,
        exclude_self,
        timeout_ms: 0,
        ..SearchConfig::default()
    }
}

#[test]
fn query_orders_nearest_first() {
    let index = three_patient_index();
    let hits = index.query(&[1.0, 0.0], 2).expect("query");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].patient_id, "P1");
    assert!(hits[0].distance.abs() < 1e-12);
    assert_eq!(hits[1].patient_id, "P3");
    let expected = 1.0 - 0.9 / (0.82_f64).sqrt();
    assert!((hits[1].distance - expected).abs() < 1e-9);
    assert!(hits[1].distance > 0.006 && hits[1].distance < 0.0062);
}

#[test]
fn query_distances_match_cosine_and_never_decrease() {
    let embeddings = (0..40)
        .map(|index| {
            let angle = index as f64 * 0.37;
            embedding(&format!("P{index:02}"), &[angle.cos(), angle.sin(), (index % 3) as f64])
        })
        .collect::<Vec<_>>();
    let index = BruteForceIndex::build(&embeddings).expect("build index");
    let query = [0.3, -0.8, 1.0];

    let hits = index.query(&query, 7).expect("query");
    assert_eq!(hits.len(), 7);
    assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));

    for hit in &hits {
        let stored = embeddings
            .iter()
            .find(|entry| entry.patient_id == hit.patient_id)
            .expect("hit refers to stored patient");
        let dot = query
            .iter()
            .zip(&stored.embedding)
            .map(|(left, right)| left * right)
            .sum::<f64>();
        let norms = query.iter().map(|value| value * value).sum::<f64>().sqrt()
            * stored.embedding.iter().map(|value| value * value).sum::<f64>().sqrt();
        assert!((hit.distance - (1.0 - dot / norms)).abs() < 1e-6);
    }
}

#[test]
fn k_larger_than_store_returns_everything_sorted() {
    let index = three_patient_index();
    let hits = index.query(&[0.0, 1.0], 10).expect("query");
    let ids = hits.iter().map(|hit| hit.patient_id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["P2", "P3", "P1"]);
}

#[test]
fn ties_break_by_patient_id() {
    let index = BruteForceIndex::build(&[
        embedding("B", &[1.0, 0.0]),
        embedding("A", &[2.0, 0.0]),
        embedding("C", &[3.0, 0.0]),
    ])
    .expect("build index");

    let hits = index.query(&[1.0, 0.0], 3).expect("query");
    let ids = hits.iter().map(|hit| hit.patient_id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["A", "B", "C"]);
}

#[test]
fn empty_index_returns_empty_list() {
    let index = BruteForceIndex::build(&[]).expect("empty build");
    assert!(index.is_empty());
    assert!(index.query(&[1.0, 2.0, 3.0], 5).expect("query").is_empty());
}

#[test]
fn zero_query_vector_uses_sentinel_distance() {
    let index = three_patient_index();
    let hits = index.query(&[0.0, 0.0], 3).expect("query");
    assert!(hits.iter().all(|hit| hit.distance == 1.0));
    let ids = hits.iter().map(|hit| hit.patient_id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["P1", "P2", "P3"]);
}

#[test]
fn build_rejects_mixed_dimensions() {
    let err = BruteForceIndex::build(&[embedding("P1", &[1.0]), embedding("P2", &[1.0, 2.0])])
        .expect_err("mismatch must fail");
    assert!(matches!(err, SearchError::DimensionMismatch { expected: 1, actual: 2, .. }));
}

#[test]
fn query_with_wrong_dimension_is_rejected() {
    let index = three_patient_index();
    let err = index.query(&[1.0, 0.0, 0.0], 2).expect_err("wrong dimension");
    assert!(matches!(err, SearchError::DimensionMismatch { expected: 2, actual: 3, .. }));
}

#[test]
fn query_excluding_drops_the_query_patient() {
    let index = three_patient_index();
    let hits = index.query_excluding(&[1.0, 0.0], 2, "P1").expect("query");
    let ids = hits.iter().map(|hit| hit.patient_id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["P3", "P2"]);
}

#[test]
fn batch_query_matches_sequential_results_and_orders_by_query_id() {
    let embeddings = (0..30)
        .map(|index| {
            let angle = index as f64 * 0.21;
            embedding(&format!("P{index:02}"), &[angle.cos(), angle.sin()])
        })
        .collect::<Vec<_>>();
    let index = BruteForceIndex::build(&embeddings).expect("build index");
    let queries = embeddings
        .iter()
        .rev()
        .map(|entry| NeighborQuery {
            query_id: entry.patient_id.clone(),
            vector: entry.embedding.clone(),
        })
        .collect::<Vec<_>>();

    let sequential = batch_query(&index, &queries, &config(4, 1, true)).expect("sequential");
    let parallel = batch_query(&index, &queries, &config(4, 4, true)).expect("parallel");

    assert_eq!(sequential, parallel);
    assert_eq!(sequential.len(), 30);
    assert_eq!(sequential[0].query_id, "P00");
    assert!(sequential.iter().all(|list| list.len() == 4));
    assert!(sequential
        .iter()
        .all(|list| list.neighbors.iter().all(|hit| hit.neighbor_id != list.query_id)));
}

#[test]
fn batch_query_fails_whole_batch_on_bad_query() {
    let index = three_patient_index();
    let queries = vec![
        NeighborQuery {
            query_id: "good".to_string(),
            vector: vec![1.0, 0.0],
        },
        NeighborQuery {
            query_id: "bad".to_string(),
            vector: vec![1.0],
        },
    ];

    for workers in [1, 3] {
        let err = batch_query(&index, &queries, &config(2, workers, false))
            .expect_err("batch must fail");
        assert!(
            matches!(&err, SearchError::DimensionMismatch { patient_id, .. } if patient_id == "bad"),
            "unexpected error: {err}"
        );
    }
}

#[test]
fn batch_query_honours_external_cancellation() {
    let index = three_patient_index();
    let queries = vec![NeighborQuery {
        query_id: "P1".to_string(),
        vector: vec![1.0, 0.0],
    }];
    let cancel = AtomicBool::new(true);

    let err = batch_query_with_cancel(&index, &queries, &config(2, 1, true), &cancel)
        .expect_err("cancelled batch must fail");
    assert!(matches!(err, SearchError::Cancelled { .. }));
}

#[test]
fn expired_budget_reports_timeout() {
    let budget = QueryBudget::new(1).expect("budget enabled");
    std::thread::sleep(std::time::Duration::from_millis(5));
    let guard = ScanGuard::new("P9", Some(budget), None);

    let err = guard.check().expect_err("budget exceeded");
    assert!(matches!(err, SearchError::Timeout { budget_ms: 1, .. }));
    assert!(QueryBudget::new(0).is_none());
}

#[test]
fn empty_batch_is_not_an_error() {
    let index = three_patient_index();
    assert!(batch_query(&index, &[], &config(2, 2, true)).expect("empty").is_empty());
}
