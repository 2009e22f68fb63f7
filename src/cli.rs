use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    AlertConfig, BoostingParams, DECISION_THRESHOLD, DEFAULT_ALERT_ROW_LIMIT,
    DEFAULT_ALERT_THRESHOLD, DEFAULT_CREATININE_THRESHOLD, DEFAULT_L2_REGULARIZATION,
    DEFAULT_LABEL_HEURISTIC_THRESHOLD, DEFAULT_LEARNING_RATE, DEFAULT_MAX_DEPTH,
    DEFAULT_MAX_ITERATIONS, DEFAULT_MIN_SAMPLES_LEAF, DEFAULT_SAMPLE_SEED, DEFAULT_SAMPLE_SIZE,
    DEFAULT_SEARCH_TIMEOUT_MS, DEFAULT_SEARCH_WORKERS, DEFAULT_TOP_K, DEFAULT_WBC_THRESHOLD,
    DISTANCE_METRIC, FilterPolicy, RarePatternThresholds, SearchConfig, SelectionPolicy,
    TrainerConfig,
};

pub const DEFAULT_CACHE_ROOT: &str = ".cache/icu-risk";
pub const DEFAULT_DB_FILENAME: &str = "icu_risk.sqlite";

#[derive(Parser, Debug)]
#[command(
    name = "icu-risk",
    version,
    about = "ICU admission risk scoring from note similarity and lab values"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score sampled patients through neighbor search and persist the alert set.
    Alerts(AlertArgs),
    /// Train the lab-feature classifier, persist predictions and evaluate them.
    Train(TrainArgs),
    /// Alerts followed by training in one process.
    Run(RunArgs),
    /// Print the nearest neighbors of one stored patient.
    Neighbors(NeighborsArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = DEFAULT_CACHE_ROOT)]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

impl StoreArgs {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.cache_root.join(DEFAULT_DB_FILENAME))
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.cache_root.join("manifests")
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchOptions {
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    #[arg(long, default_value_t = DEFAULT_SEARCH_WORKERS)]
    pub search_workers: usize,

    /// Per-query search budget in milliseconds; 0 disables it.
    #[arg(long, default_value_t = DEFAULT_SEARCH_TIMEOUT_MS)]
    pub search_timeout_ms: u64,

    /// Let a patient appear in its own neighbor list.
    #[arg(long, default_value_t = false)]
    pub include_self: bool,
}

impl SearchOptions {
    pub fn to_config(&self) -> SearchConfig {
        SearchConfig {
            metric: DISTANCE_METRIC.to_string(),
            top_k: self.top_k,
            exclude_self: !self.include_self,
            workers: self.search_workers,
            timeout_ms: self.search_timeout_ms,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RareOptions {
    #[arg(long, default_value_t = DEFAULT_CREATININE_THRESHOLD)]
    pub creatinine_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_WBC_THRESHOLD)]
    pub wbc_threshold: f64,
}

impl RareOptions {
    pub fn thresholds(&self) -> RarePatternThresholds {
        RarePatternThresholds {
            creatinine: self.creatinine_threshold,
            wbc: self.wbc_threshold,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AlertOptions {
    #[command(flatten)]
    pub search: SearchOptions,

    #[arg(long, default_value_t = DEFAULT_ALERT_THRESHOLD)]
    pub alert_threshold: f64,

    #[arg(long, value_enum, default_value_t = FilterPolicy::Off)]
    pub filter_policy: FilterPolicy,

    #[arg(long, value_enum, default_value_t = SelectionPolicy::Seeded)]
    pub selection_policy: SelectionPolicy,

    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
    pub sample_size: usize,

    #[arg(long, default_value_t = DEFAULT_SAMPLE_SEED)]
    pub sample_seed: u64,

    #[arg(long, default_value_t = DEFAULT_ALERT_ROW_LIMIT)]
    pub row_limit: usize,

    /// RFC 3339 timestamp stamped on every alert; defaults to now.
    #[arg(long)]
    pub generated_at: Option<String>,
}

impl AlertOptions {
    pub fn to_config(&self, rare: &RareOptions) -> AlertConfig {
        AlertConfig {
            search: self.search.to_config(),
            alert_threshold: self.alert_threshold,
            rare_pattern: rare.thresholds(),
            filter_policy: self.filter_policy,
            selection_policy: self.selection_policy,
            sample_size: self.sample_size,
            sample_seed: self.sample_seed,
            row_limit: self.row_limit,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TrainOptions {
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: usize,

    #[arg(long, default_value_t = DEFAULT_LEARNING_RATE)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    #[arg(long, default_value_t = DEFAULT_MIN_SAMPLES_LEAF)]
    pub min_samples_leaf: usize,

    #[arg(long, default_value_t = DEFAULT_L2_REGULARIZATION)]
    pub l2_regularization: f64,

    #[arg(long, default_value_t = DEFAULT_LABEL_HEURISTIC_THRESHOLD)]
    pub label_heuristic_threshold: f64,

    #[arg(long, default_value_t = DECISION_THRESHOLD)]
    pub decision_threshold: f64,
}

impl TrainOptions {
    pub fn to_config(&self, rare: &RareOptions) -> TrainerConfig {
        TrainerConfig {
            boosting: BoostingParams {
                max_iterations: self.max_iterations,
                learning_rate: self.learning_rate,
                max_depth: self.max_depth,
                min_samples_leaf: self.min_samples_leaf,
                l2_regularization: self.l2_regularization,
            },
            rare_pattern: rare.thresholds(),
            label_heuristic_threshold: self.label_heuristic_threshold,
            decision_threshold: self.decision_threshold,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AlertArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub rare: RareOptions,

    #[command(flatten)]
    pub alert: AlertOptions,
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub rare: RareOptions,

    #[command(flatten)]
    pub train: TrainOptions,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub rare: RareOptions,

    #[command(flatten)]
    pub alert: AlertOptions,

    #[command(flatten)]
    pub train: TrainOptions,
}

#[derive(Args, Debug, Clone)]
pub struct NeighborsArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub patient_id: String,

    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Let the patient appear in its own neighbor list.
    #[arg(long, default_value_t = false)]
    pub include_self: bool,

    #[command(flatten)]
    pub rare: RareOptions,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}
