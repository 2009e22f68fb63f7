mod embeddings;
mod features;
mod outputs;
mod schema;
#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

pub use embeddings::{EmbeddingStore, load_embedding_store};
pub use features::{FeatureStore, load_feature_store};
pub use outputs::{
    load_alerts, load_heuristic_scores, load_latest_evaluation, replace_alerts,
    replace_evaluation, replace_predictions,
};
pub use schema::{
    ALERTS_TABLE, EMBEDDINGS_TABLE, EVALUATION_TABLE, FEATURES_TABLE, PREDICTIONS_TABLE,
    count_rows, open_read_only, open_read_write,
};
