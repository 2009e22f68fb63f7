mod advisor;
mod generate;
mod select;

pub use advisor::Advisor;
pub use generate::{AlertGeneration, AlertGenerator};
pub use select::seeded_rng;
