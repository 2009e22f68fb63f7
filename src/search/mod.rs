//! Exact cosine nearest-neighbor search over patient note embeddings.
//!
//! Callers go through [`NeighborIndex`], so the brute-force scan can be
//! swapped for a faster structure without touching alert generation.

mod batch;
mod index;
#[cfg(test)]
mod tests;

pub use batch::{NeighborQuery, batch_query, ranked_list};
pub use index::{BruteForceIndex, NeighborIndex};
