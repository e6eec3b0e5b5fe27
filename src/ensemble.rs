//! Bagged regression trees with variance-reduction splits.

use crate::errors::{AppError, AppResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 5,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            Self::Leaf(value) => *value,
            Self::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            Self::Leaf(_) => 0,
            Self::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionForest {
    trees: Vec<Node>,
    width: usize,
}

impl RegressionForest {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: ForestParams) -> AppResult<Self> {
        if rows.is_empty() {
            return Err(AppError::ModelFitting("no training rows".to_string()));
        }
        if rows.len() != targets.len() {
            return Err(AppError::ModelFitting(format!(
                "{} rows but {} targets",
                rows.len(),
                targets.len()
            )));
        }
        let width = rows[0].len();
        if width == 0 || rows.iter().any(|row| row.len() != width) {
            return Err(AppError::ModelFitting("ragged feature rows".to_string()));
        }
        let finite = rows.iter().flatten().chain(targets).all(|value| value.is_finite());
        if !finite {
            return Err(AppError::ModelFitting("non-finite training value".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.n_estimators.max(1))
            .map(|_| {
                let sample: Vec<usize> = (0..rows.len())
                    .map(|_| rng.random_range(0..rows.len()))
                    .collect();
                grow(rows, targets, sample, 0, &params)
            })
            .collect();

        Ok(Self { trees, width })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        if row.len() != self.width {
            return f64::NAN;
        }
        self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn mean_squared_error(&self, rows: &[Vec<f64>], targets: &[f64]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        rows.iter()
            .zip(targets)
            .map(|(row, target)| (self.predict(row) - target).powi(2))
            .sum::<f64>()
            / rows.len() as f64
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(Node::depth).max().unwrap_or(0)
    }
}

fn grow(rows: &[Vec<f64>], targets: &[f64], indices: Vec<usize>, depth: usize, params: &ForestParams) -> Node {
    let mean = indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64;
    if depth >= params.max_depth || indices.len() < params.min_samples_split.max(2) {
        return Node::Leaf(mean);
    }

    let Some((feature, threshold)) = best_split(rows, targets, &indices) else {
        return Node::Leaf(mean);
    };
    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .into_iter()
        .partition(|&i| rows[i][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow(rows, targets, left, depth + 1, params)),
        right: Box::new(grow(rows, targets, right, depth + 1, params)),
    }
}

fn best_split(rows: &[Vec<f64>], targets: &[f64], indices: &[usize]) -> Option<(usize, f64)> {
    let n = indices.len() as f64;
    let total: f64 = indices.iter().map(|&i| targets[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| targets[i] * targets[i]).sum();
    let parent_sse = total_sq - total * total / n;
    if parent_sse <= f64::EPSILON {
        return None;
    }

    let mut best: Option<(usize, f64, f64)> = None;
    for feature in 0..rows[indices[0]].len() {
        let mut order = indices.to_vec();
        order.sort_by(|a, b| rows[*a][feature].total_cmp(&rows[*b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for position in 0..order.len() - 1 {
            let y = targets[order[position]];
            left_sum += y;
            left_sq += y * y;

            let here = rows[order[position]][feature];
            let next = rows[order[position + 1]][feature];
            if here == next {
                continue;
            }
            let left_n = (position + 1) as f64;
            let right_n = n - left_n;
            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n) + (right_sq - right_sum * right_sum / right_n);
            if best.map_or(true, |(_, _, current)| sse < current) {
                best = Some((feature, (here + next) / 2.0, sse));
            }
        }
    }

    best.filter(|(_, _, sse)| *sse < parent_sse)
        .map(|(feature, threshold, _)| (feature, threshold))
}
