use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::SelectionPolicy;

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Picks the query patients for one alert run. `patient_ids` must already be
/// sorted; the selection is returned in ascending id order.
pub fn select_query_patients<R: Rng + ?Sized>(
    patient_ids: &[String],
    sample_size: usize,
    policy: SelectionPolicy,
    rng: &mut R,
) -> Vec<String> {
    let mut selected: Vec<String> = match policy {
        SelectionPolicy::Fixed => patient_ids.iter().take(sample_size).cloned().collect(),
        SelectionPolicy::Seeded => patient_ids
            .choose_multiple(rng, sample_size)
            .cloned()
            .collect(),
    };
    selected.sort();
    selected
}
