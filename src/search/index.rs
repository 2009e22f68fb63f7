use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::SearchError;
use crate::model::PatientEmbedding;
use crate::semantic::{distance_from_parts, dot_product, magnitude, uniform_dimensions};
use crate::store::EmbeddingStore;

/// Rows scanned between budget and cancellation checks.
const SCAN_CHECK_INTERVAL: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredNeighbor {
    pub patient_id: String,
    pub distance: f64,
}

pub trait NeighborIndex: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> Option<usize>;

    /// Up to `k` nearest entries, ascending distance, ties by patient id.
    fn search(
        &self,
        vector: &[f64],
        k: usize,
        exclude: Option<&str>,
        guard: &ScanGuard<'_>,
    ) -> Result<Vec<ScoredNeighbor>, SearchError>;
}

#[derive(Debug, Clone, Copy)]
pub struct QueryBudget {
    started: Instant,
    timeout_ms: u64,
}

impl QueryBudget {
    pub fn new(timeout_ms: u64) -> Option<Self> {
        if timeout_ms == 0 {
            return None;
        }
        Some(Self {
            started: Instant::now(),
            timeout_ms,
        })
    }

    pub fn elapsed_ms(self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn enforce(self, query_id: &str) -> Result<(), SearchError> {
        let elapsed_ms = self.elapsed_ms();
        if elapsed_ms <= self.timeout_ms as f64 {
            return Ok(());
        }

        Err(SearchError::Timeout {
            query_id: query_id.to_string(),
            elapsed_ms,
            budget_ms: self.timeout_ms,
        })
    }
}

/// Per-query guard checked while scanning: an optional time budget and an
/// optional batch-wide cancellation flag.
#[derive(Debug, Clone, Copy)]
pub struct ScanGuard<'a> {
    query_id: &'a str,
    budget: Option<QueryBudget>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> ScanGuard<'a> {
    pub fn new(query_id: &'a str, budget: Option<QueryBudget>, cancel: Option<&'a AtomicBool>) -> Self {
        Self {
            query_id,
            budget,
            cancel,
        }
    }

    pub fn unbounded(query_id: &'a str) -> Self {
        Self::new(query_id, None, None)
    }

    pub fn query_id(&self) -> &'a str {
        self.query_id
    }

    pub fn check(&self) -> Result<(), SearchError> {
        if self
            .cancel
            .is_some_and(|flag| flag.load(Ordering::Acquire))
        {
            return Err(SearchError::Cancelled {
                query_id: self.query_id.to_string(),
            });
        }

        match self.budget {
            Some(budget) => budget.enforce(self.query_id),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedVector {
    patient_id: String,
    vector: Vec<f64>,
    norm: f64,
}

/// Exact scan over every stored vector. Magnitudes are computed once at build.
#[derive(Debug, Clone, Default)]
pub struct BruteForceIndex {
    entries: Vec<IndexedVector>,
    dimensions: Option<usize>,
}

impl BruteForceIndex {
    pub fn build(embeddings: &[PatientEmbedding]) -> Result<Self, SearchError> {
        let dimensions = uniform_dimensions(embeddings)?;

        let mut entries = embeddings
            .iter()
            .map(|entry| IndexedVector {
                patient_id: entry.patient_id.clone(),
                norm: magnitude(&entry.embedding),
                vector: entry.embedding.clone(),
            })
            .collect::<Vec<IndexedVector>>();
        entries.sort_by(|left, right| left.patient_id.cmp(&right.patient_id));

        Ok(Self {
            entries,
            dimensions,
        })
    }

    pub fn from_store(store: &EmbeddingStore) -> Result<Self, SearchError> {
        Self::build(store.entries())
    }

    pub fn query(&self, vector: &[f64], k: usize) -> Result<Vec<ScoredNeighbor>, SearchError> {
        self.search(vector, k, None, &ScanGuard::unbounded("query"))
    }

    pub fn query_excluding(
        &self,
        vector: &[f64],
        k: usize,
        exclude: &str,
    ) -> Result<Vec<ScoredNeighbor>, SearchError> {
        self.search(vector, k, Some(exclude), &ScanGuard::unbounded(exclude))
    }
}

impl NeighborIndex for BruteForceIndex {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn search(
        &self,
        vector: &[f64],
        k: usize,
        exclude: Option<&str>,
        guard: &ScanGuard<'_>,
    ) -> Result<Vec<ScoredNeighbor>, SearchError> {
        let Some(dimensions) = self.dimensions else {
            return Ok(Vec::new());
        };
        if vector.len() != dimensions {
            return Err(SearchError::DimensionMismatch {
                patient_id: guard.query_id().to_string(),
                expected: dimensions,
                actual: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = magnitude(vector);
        let mut scored = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| exclude != Some(entry.patient_id.as_str()))
            .map(|(position, entry)| {
                if position % SCAN_CHECK_INTERVAL == 0 {
                    guard.check()?;
                }
                let dot = dot_product(vector, &entry.vector);
                Ok((position, distance_from_parts(dot, query_norm, entry.norm)))
            })
            .collect::<Result<Vec<(usize, f64)>, SearchError>>()?;

        // Entries are sorted by patient id, so position order is id order.
        scored.sort_by(|left, right| left.1.total_cmp(&right.1).then(left.0.cmp(&right.0)));
        scored.truncate(k);
        guard.check()?;

        Ok(scored
            .into_iter()
            .map(|(position, distance)| ScoredNeighbor {
                patient_id: self.entries[position].patient_id.clone(),
                distance,
            })
            .collect())
    }
}
