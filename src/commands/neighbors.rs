use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::NeighborsArgs;
use crate::config::{DISTANCE_METRIC, RarePatternThresholds};
use crate::scoring::{NeighborLabSummary, aggregate_neighbors};
use crate::search::{BruteForceIndex, ranked_list};
use crate::store::{
    EmbeddingStore, FeatureStore, load_embedding_store, load_feature_store, open_read_only,
};

#[derive(Debug, Clone, Serialize)]
pub struct NeighborRow {
    pub rank: usize,
    pub neighbor_id: String,
    pub distance: f64,
    pub wbc: Option<f64>,
    pub hemoglobin: Option<f64>,
    pub creatinine: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NeighborsResponse {
    pub query_id: String,
    pub metric: String,
    pub top_k: usize,
    pub exclude_self: bool,
    pub returned: usize,
    pub neighbors: Vec<NeighborRow>,
    pub summary: NeighborLabSummary,
}

pub fn run(args: NeighborsArgs) -> Result<()> {
    let db_path = args.store.resolved_db_path();
    let connection = open_read_only(&db_path)?;
    let embeddings = load_embedding_store(&connection)?;
    let features = load_feature_store(&connection)?;

    let response = lookup(
        &embeddings,
        &features,
        &args.patient_id,
        args.top_k,
        !args.include_self,
        &args.rare.thresholds(),
    )?;
    info!(
        patient_id = %response.query_id,
        returned = response.returned,
        "neighbor lookup complete"
    );

    if args.json {
        write_json_response(&response)
    } else {
        write_text_response(&response)
    }
}

pub(crate) fn lookup(
    embeddings: &EmbeddingStore,
    features: &FeatureStore,
    patient_id: &str,
    top_k: usize,
    exclude_self: bool,
    rare_pattern: &RarePatternThresholds,
) -> Result<NeighborsResponse> {
    let Some(entry) = embeddings.get(patient_id) else {
        bail!("patient '{patient_id}' has no stored embedding");
    };

    let index = BruteForceIndex::from_store(embeddings).context("failed to build neighbor index")?;
    let hits = if exclude_self {
        index.query_excluding(&entry.embedding, top_k, &entry.patient_id)?
    } else {
        index.query(&entry.embedding, top_k)?
    };
    let list = ranked_list(&entry.patient_id, hits);

    let neighbors = list
        .neighbors
        .iter()
        .enumerate()
        .map(|(position, neighbor)| {
            let labs = features.get(&neighbor.neighbor_id);
            NeighborRow {
                rank: position + 1,
                neighbor_id: neighbor.neighbor_id.clone(),
                distance: neighbor.distance,
                wbc: labs.and_then(|row| row.wbc),
                hemoglobin: labs.and_then(|row| row.hemoglobin),
                creatinine: labs.and_then(|row| row.creatinine),
            }
        })
        .collect::<Vec<NeighborRow>>();

    Ok(NeighborsResponse {
        query_id: list.query_id.clone(),
        metric: DISTANCE_METRIC.to_string(),
        top_k,
        exclude_self,
        returned: neighbors.len(),
        summary: aggregate_neighbors(&list, features, rare_pattern),
        neighbors,
    })
}

fn write_json_response(response: &NeighborsResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, response)
        .context("failed to serialize neighbors json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(response: &NeighborsResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Patient: {}", response.query_id)?;
    writeln!(
        output,
        "Search: metric={} top_k={} exclude_self={} returned={}",
        response.metric, response.top_k, response.exclude_self, response.returned,
    )?;
    for row in &response.neighbors {
        writeln!(
            output,
            "{}. {} distance={:.6} wbc={} hemoglobin={} creatinine={}",
            row.rank,
            row.neighbor_id,
            row.distance,
            render_lab(row.wbc),
            render_lab(row.hemoglobin),
            render_lab(row.creatinine),
        )?;
    }
    writeln!(
        output,
        "Joined labs: {} of {} neighbors, rare-pattern neighbors: {}",
        response.summary.neighbor_count,
        response.summary.list_len,
        response.summary.rare_pattern_neighbors,
    )?;
    output.flush()?;
    Ok(())
}

fn render_lab(value: Option<f64>) -> String {
    value
        .map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| "-".to_string())
}
