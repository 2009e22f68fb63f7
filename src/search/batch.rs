use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::model::{NeighborMatch, RankedNeighborList};

use super::index::{NeighborIndex, QueryBudget, ScanGuard, ScoredNeighbor};

#[derive(Debug, Clone, PartialEq)]
pub struct NeighborQuery {
    pub query_id: String,
    pub vector: Vec<f64>,
}

pub fn ranked_list(query_id: &str, hits: Vec<ScoredNeighbor>) -> RankedNeighborList {
    RankedNeighborList {
        query_id: query_id.to_string(),
        neighbors: hits
            .into_iter()
            .map(|hit| NeighborMatch {
                query_id: query_id.to_string(),
                neighbor_id: hit.patient_id,
                distance: hit.distance,
            })
            .collect(),
    }
}

pub fn batch_query<I: NeighborIndex + ?Sized>(
    index: &I,
    queries: &[NeighborQuery],
    config: &SearchConfig,
) -> Result<Vec<RankedNeighborList>, SearchError> {
    let cancel = AtomicBool::new(false);
    batch_query_with_cancel(index, queries, config, &cancel)
}

/// Runs every query independently against the same index. The first failing
/// query raises `cancel`, in-flight queries stop at their next check, and the
/// whole batch fails with the root cause. Results come back ordered by query id.
pub fn batch_query_with_cancel<I: NeighborIndex + ?Sized>(
    index: &I,
    queries: &[NeighborQuery],
    config: &SearchConfig,
    cancel: &AtomicBool,
) -> Result<Vec<RankedNeighborList>, SearchError> {
    if queries.is_empty() {
        return Ok(Vec::new());
    }

    let run_one = |query: &NeighborQuery| -> Result<RankedNeighborList, SearchError> {
        let guard = ScanGuard::new(
            &query.query_id,
            QueryBudget::new(config.timeout_ms),
            Some(cancel),
        );
        let exclude = config.exclude_self.then_some(query.query_id.as_str());

        match index.search(&query.vector, config.top_k, exclude, &guard) {
            Ok(hits) => Ok(ranked_list(&query.query_id, hits)),
            Err(err) => {
                cancel.store(true, Ordering::Release);
                Err(err)
            }
        }
    };

    let workers = config.workers.max(1);
    debug!(
        queries = queries.len(),
        workers,
        top_k = config.top_k,
        "running neighbor batch"
    );

    let outcomes = if workers == 1 {
        queries.iter().map(&run_one).collect::<Vec<_>>()
    } else {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|err| SearchError::WorkerPool(err.to_string()))?;
        pool.install(|| queries.par_iter().map(&run_one).collect::<Vec<_>>())
    };

    merge_outcomes(outcomes)
}

fn merge_outcomes(
    outcomes: Vec<Result<RankedNeighborList, SearchError>>,
) -> Result<Vec<RankedNeighborList>, SearchError> {
    let mut merged = BTreeMap::<String, RankedNeighborList>::new();
    let mut cancelled = None::<SearchError>;

    for outcome in outcomes {
        match outcome {
            Ok(list) => {
                merged.insert(list.query_id.clone(), list);
            }
            Err(err @ SearchError::Cancelled { .. }) => {
                if cancelled.is_none() {
                    cancelled = Some(err);
                }
            }
            Err(err) => {
                warn!(error = %err, "neighbor batch aborted");
                return Err(err);
            }
        }
    }

    match cancelled {
        Some(err) => {
            warn!(error = %err, "neighbor batch cancelled");
            Err(err)
        }
        None => Ok(merged.into_values().collect()),
    }
}
