use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::model::PatientFeature;

pub const DISTANCE_METRIC: &str = "cosine";

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_SEARCH_WORKERS: usize = 4;
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 2000;

pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_CREATININE_THRESHOLD: f64 = 2.0;
pub const DEFAULT_WBC_THRESHOLD: f64 = 12.0;
pub const DEFAULT_SAMPLE_SIZE: usize = 100;
pub const DEFAULT_SAMPLE_SEED: u64 = 42;
pub const DEFAULT_ALERT_ROW_LIMIT: usize = 500;

pub const DEFAULT_MAX_ITERATIONS: usize = 50;
pub const DEFAULT_LEARNING_RATE: f64 = 0.3;
pub const DEFAULT_MAX_DEPTH: usize = 6;
pub const DEFAULT_MIN_SAMPLES_LEAF: usize = 1;
pub const DEFAULT_L2_REGULARIZATION: f64 = 1.0;
pub const DEFAULT_LABEL_HEURISTIC_THRESHOLD: f64 = 0.5;

/// Probability cutoff for turning classifier output into a positive call.
pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Sample query patients with a seeded random generator.
    Seeded,
    /// Take the first patients in ascending id order.
    Fixed,
}

impl SelectionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seeded => "seeded",
            Self::Fixed => "fixed",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterPolicy {
    /// Keep every scored candidate.
    Off,
    /// Drop candidates without a rare lab pattern, then rank and cap.
    BeforeRanking,
    /// Rank and cap first, then drop candidates without a rare lab pattern.
    AfterRanking,
}

impl FilterPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::BeforeRanking => "before-ranking",
            Self::AfterRanking => "after-ranking",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RarePatternThresholds {
    pub creatinine: f64,
    pub wbc: f64,
}

impl Default for RarePatternThresholds {
    fn default() -> Self {
        Self {
            creatinine: DEFAULT_CREATININE_THRESHOLD,
            wbc: DEFAULT_WBC_THRESHOLD,
        }
    }
}

impl RarePatternThresholds {
    /// Creatinine above its cutoff or WBC above its cutoff. Missing values never match.
    pub fn matches(&self, feature: &PatientFeature) -> bool {
        feature
            .creatinine
            .is_some_and(|value| value > self.creatinine)
            || feature.wbc.is_some_and(|value| value > self.wbc)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub metric: String,
    pub top_k: usize,
    pub exclude_self: bool,
    pub workers: usize,
    /// Per-query budget; 0 disables the timeout.
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            metric: DISTANCE_METRIC.to_string(),
            top_k: DEFAULT_TOP_K,
            exclude_self: true,
            workers: DEFAULT_SEARCH_WORKERS,
            timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub search: SearchConfig,
    pub alert_threshold: f64,
    pub rare_pattern: RarePatternThresholds,
    pub filter_policy: FilterPolicy,
    pub selection_policy: SelectionPolicy,
    pub sample_size: usize,
    pub sample_seed: u64,
    pub row_limit: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            rare_pattern: RarePatternThresholds::default(),
            filter_policy: FilterPolicy::Off,
            selection_policy: SelectionPolicy::Seeded,
            sample_size: DEFAULT_SAMPLE_SIZE,
            sample_seed: DEFAULT_SAMPLE_SEED,
            row_limit: DEFAULT_ALERT_ROW_LIMIT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub max_iterations: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub l2_regularization: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            learning_rate: DEFAULT_LEARNING_RATE,
            max_depth: DEFAULT_MAX_DEPTH,
            min_samples_leaf: DEFAULT_MIN_SAMPLES_LEAF,
            l2_regularization: DEFAULT_L2_REGULARIZATION,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub boosting: BoostingParams,
    pub rare_pattern: RarePatternThresholds,
    pub label_heuristic_threshold: f64,
    pub decision_threshold: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            boosting: BoostingParams::default(),
            rare_pattern: RarePatternThresholds::default(),
            label_heuristic_threshold: DEFAULT_LABEL_HEURISTIC_THRESHOLD,
            decision_threshold: DECISION_THRESHOLD,
        }
    }
}
