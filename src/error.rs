use thiserror::Error;

/// Failures raised while building or querying a neighbor index.
#[derive(Debug, Error)]
pub enum SearchError {
    /// An embedding (or query vector) does not match the store's dimensionality.
    #[error("embedding for '{patient_id}' has {actual} dimensions; expected {expected}")]
    DimensionMismatch {
        patient_id: String,
        expected: usize,
        actual: usize,
    },
    /// The same patient id was supplied twice to one store.
    #[error("patient '{0}' appears more than once in the embedding store")]
    DuplicatePatient(String),
    /// A single query ran past its per-query budget.
    #[error(
        "neighbor search for '{query_id}' exceeded its budget ({elapsed_ms:.1} ms > {budget_ms} ms); lower --top-k, raise --search-workers, or increase --search-timeout-ms"
    )]
    Timeout {
        query_id: String,
        elapsed_ms: f64,
        budget_ms: u64,
    },
    /// The batch was cancelled while this query was in flight.
    #[error("neighbor search for '{query_id}' was cancelled")]
    Cancelled { query_id: String },
    /// The bounded worker pool could not be started.
    #[error("failed to start search worker pool: {0}")]
    WorkerPool(String),
}
