use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BoostingParams;

/// Fitting stops once every residual is smaller than this.
pub const CONVERGENCE_TOLERANCE: f64 = 1e-6;

const PROBABILITY_FLOOR: f64 = 1e-9;
const MIN_SPLIT_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Self::Leaf { value } => return *value,
                Self::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::Leaf { .. } => 0,
            Self::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Binary classifier: additive regression trees on the log-odds scale,
/// fitted to logistic loss with Newton leaf values. Leaf values already
/// include the learning rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedClassifier {
    pub feature_count: usize,
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<TreeNode>,
    pub converged: bool,
}

impl GradientBoostedClassifier {
    pub fn fit(rows: &[Vec<f64>], labels: &[bool], params: &BoostingParams) -> Result<Self> {
        if rows.is_empty() {
            bail!("cannot train classifier on an empty training set");
        }
        if rows.len() != labels.len() {
            bail!(
                "training rows ({}) and labels ({}) differ in length",
                rows.len(),
                labels.len()
            );
        }
        let feature_count = rows[0].len();
        if let Some(position) = rows.iter().position(|row| row.len() != feature_count) {
            bail!(
                "training row {position} has {} features, expected {feature_count}",
                rows[position].len()
            );
        }
        if !params.learning_rate.is_finite() || params.learning_rate <= 0.0 {
            bail!("learning rate must be a positive finite number");
        }
        if !params.l2_regularization.is_finite() || params.l2_regularization < 0.0 {
            bail!("l2 regularization must be a non-negative finite number");
        }

        let targets = labels
            .iter()
            .map(|label| if *label { 1.0 } else { 0.0 })
            .collect::<Vec<f64>>();
        let positive_rate = (targets.iter().sum::<f64>() / targets.len() as f64)
            .clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
        let base_score = (positive_rate / (1.0 - positive_rate)).ln();

        let builder = TreeBuilder {
            rows,
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf.max(1),
            l2_regularization: params.l2_regularization,
            learning_rate: params.learning_rate,
        };
        let mut raw = vec![base_score; rows.len()];
        let mut trees = Vec::<TreeNode>::new();
        let mut converged = false;

        for iteration in 0..params.max_iterations {
            let probabilities = raw.iter().map(|value| sigmoid(*value)).collect::<Vec<f64>>();
            let residuals = targets
                .iter()
                .zip(&probabilities)
                .map(|(target, probability)| target - probability)
                .collect::<Vec<f64>>();
            if residuals
                .iter()
                .all(|residual| residual.abs() < CONVERGENCE_TOLERANCE)
            {
                converged = true;
                debug!(iteration, "boosting converged");
                break;
            }
            let hessians = probabilities
                .iter()
                .map(|probability| probability * (1.0 - probability))
                .collect::<Vec<f64>>();

            let indices = (0..rows.len()).collect::<Vec<usize>>();
            let tree = builder.build(&indices, &residuals, &hessians, 0);
            for (value, row) in raw.iter_mut().zip(rows) {
                *value += tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            feature_count,
            base_score,
            learning_rate: params.learning_rate,
            trees,
            converged,
        })
    }

    pub fn raw_score(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>()
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.raw_score(row))
    }
}

pub fn sigmoid(value: f64) -> f64 {
    if value >= 0.0 {
        1.0 / (1.0 + (-value).exp())
    } else {
        let exp = value.exp();
        exp / (1.0 + exp)
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    max_depth: usize,
    min_samples_leaf: usize,
    l2_regularization: f64,
    learning_rate: f64,
}

impl TreeBuilder<'_> {
    fn build(
        &self,
        indices: &[usize],
        residuals: &[f64],
        hessians: &[f64],
        depth: usize,
    ) -> TreeNode {
        let split = if depth < self.max_depth && indices.len() >= 2 * self.min_samples_leaf {
            self.best_split(indices, residuals, hessians)
        } else {
            None
        };

        match split {
            Some(split) => TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: Box::new(self.build(&split.left, residuals, hessians, depth + 1)),
                right: Box::new(self.build(&split.right, residuals, hessians, depth + 1)),
            },
            None => {
                let gradient = indices.iter().map(|index| residuals[*index]).sum::<f64>();
                let hessian = indices.iter().map(|index| hessians[*index]).sum::<f64>();
                TreeNode::Leaf {
                    value: self.learning_rate * self.newton_step(gradient, hessian),
                }
            }
        }
    }

    fn newton_step(&self, gradient: f64, hessian: f64) -> f64 {
        let denominator = hessian + self.l2_regularization;
        if denominator <= 0.0 {
            return 0.0;
        }
        gradient / denominator
    }

    fn score(&self, gradient: f64, hessian: f64) -> f64 {
        let denominator = hessian + self.l2_regularization;
        if denominator <= 0.0 {
            return 0.0;
        }
        gradient * gradient / denominator
    }

    /// Exhaustive search over midpoints between distinct sorted values.
    /// Ties in gain keep the earlier feature and the lower threshold.
    fn best_split(
        &self,
        indices: &[usize],
        residuals: &[f64],
        hessians: &[f64],
    ) -> Option<SplitCandidate> {
        let total_gradient = indices.iter().map(|index| residuals[*index]).sum::<f64>();
        let total_hessian = indices.iter().map(|index| hessians[*index]).sum::<f64>();
        let parent_score = self.score(total_gradient, total_hessian);
        let feature_count = self.rows[indices[0]].len();

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in 0..feature_count {
            let mut ordered = indices.to_vec();
            ordered.sort_by(|left, right| {
                self.rows[*left][feature]
                    .total_cmp(&self.rows[*right][feature])
                    .then(left.cmp(right))
            });

            let mut left_gradient = 0.0;
            let mut left_hessian = 0.0;
            for position in 0..ordered.len() - 1 {
                let index = ordered[position];
                left_gradient += residuals[index];
                left_hessian += hessians[index];

                let left_count = position + 1;
                let right_count = ordered.len() - left_count;
                if left_count < self.min_samples_leaf || right_count < self.min_samples_leaf {
                    continue;
                }
                let current = self.rows[index][feature];
                let next = self.rows[ordered[position + 1]][feature];
                if current >= next {
                    continue;
                }

                let gain = self.score(left_gradient, left_hessian)
                    + self.score(total_gradient - left_gradient, total_hessian - left_hessian)
                    - parent_score;
                let improves = match best {
                    Some((_, _, best_gain)) => gain > best_gain + MIN_SPLIT_GAIN,
                    None => gain > MIN_SPLIT_GAIN,
                };
                if improves {
                    best = Some((feature, midpoint(current, next), gain));
                }
            }
        }

        let (feature, threshold, _) = best?;
        let (left, right) = indices
            .iter()
            .partition::<Vec<usize>, _>(|index| self.rows[**index][feature] < threshold);
        Some(SplitCandidate {
            feature,
            threshold,
            left,
            right,
        })
    }
}

/// Threshold strictly above `lower` and at most `upper`.
fn midpoint(lower: f64, upper: f64) -> f64 {
    let middle = lower + (upper - lower) / 2.0;
    if middle > lower { middle } else { upper }
}
