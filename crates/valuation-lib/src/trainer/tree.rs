//! Regression trees used as the weak learners of the boosted ensemble
//!
//! Trees are grown depth-first on presorted feature columns. Each node
//! keeps one sorted row list per feature, and a split partitions every
//! list stably, so no node ever re-sorts.

use serde::{Deserialize, Serialize};

/// A node of a fitted tree, stored in a flat arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

/// A fitted binary regression tree; rows with `x[feature] <= threshold` go left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    position: usize,
    threshold: f64,
}

struct TreeBuilder<'a, F> {
    columns: &'a [Vec<f64>],
    targets: &'a [f64],
    params: TreeParams,
    leaf_value: F,
    nodes: Vec<TreeNode>,
    goes_left: Vec<bool>,
}

impl RegressionTree {
    /// Fit a tree to `targets`
    ///
    /// `sorted` holds, for every feature, the training rows ordered by that
    /// feature's value. Split structure is chosen by squared-error reduction
    /// on `targets`; leaf outputs come from `leaf_value`, which receives the
    /// rows that reached the leaf.
    pub fn fit<F>(
        columns: &[Vec<f64>],
        targets: &[f64],
        sorted: Vec<Vec<usize>>,
        params: TreeParams,
        leaf_value: F,
    ) -> Self
    where
        F: Fn(&[usize]) -> f64,
    {
        let mut builder = TreeBuilder {
            columns,
            targets,
            params,
            leaf_value,
            nodes: Vec::new(),
            goes_left: vec![false; targets.len()],
        };
        builder.grow(sorted, 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.predict_by(|feature| x.get(feature).copied().unwrap_or(f64::NAN))
    }

    /// Walk the tree, reading feature values through `value`
    pub fn predict_by(&self, value: impl Fn(usize) -> f64) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if value(*feature) <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], index: usize) -> usize {
            match &nodes[index] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    /// Highest feature index referenced by a split, if any
    pub fn max_feature(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                TreeNode::Split { feature, .. } => Some(*feature),
                TreeNode::Leaf { .. } => None,
            })
            .max()
    }

    /// Structural sanity check for trees read back from disk
    pub(crate) fn is_well_formed(&self) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(i, n)| match n {
                TreeNode::Leaf { value } => value.is_finite(),
                TreeNode::Split {
                    left,
                    right,
                    threshold,
                    ..
                } => {
                    *left > i
                        && *right > i
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                        && !threshold.is_nan()
                }
            })
    }
}

impl<F> TreeBuilder<'_, F>
where
    F: Fn(&[usize]) -> f64,
{
    fn grow(&mut self, sorted: Vec<Vec<usize>>, depth: usize) -> usize {
        let index = self.nodes.len();
        self.nodes.push(TreeNode::Leaf { value: 0.0 });

        let n = sorted[0].len();
        let splittable = depth < self.params.max_depth
            && n >= self.params.min_samples_split
            && n >= 2 * self.params.min_samples_leaf.max(1);

        let split = if splittable { self.best_split(&sorted) } else { None };

        match split {
            None => {
                let value = (self.leaf_value)(&sorted[0]);
                self.nodes[index] = TreeNode::Leaf { value };
            }
            Some(split) => {
                for &row in &sorted[split.feature][..split.position] {
                    self.goes_left[row] = true;
                }
                let (left, right): (Vec<Vec<usize>>, Vec<Vec<usize>>) = sorted
                    .into_iter()
                    .map(|rows| {
                        rows.into_iter()
                            .partition::<Vec<usize>, _>(|&row| self.goes_left[row])
                    })
                    .unzip();
                for &row in &left[0] {
                    self.goes_left[row] = false;
                }

                let left = self.grow(left, depth + 1);
                let right = self.grow(right, depth + 1);
                self.nodes[index] = TreeNode::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left,
                    right,
                };
            }
        }
        index
    }

    fn best_split(&self, sorted: &[Vec<usize>]) -> Option<Split> {
        let n = sorted[0].len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let total: f64 = sorted[0].iter().map(|&row| self.targets[row]).sum();
        let parent_score = total * total / n as f64;
        let mut best_gain = 1e-10 * (1.0 + parent_score.abs());
        let mut best = None;

        for (feature, rows) in sorted.iter().enumerate() {
            let column = &self.columns[feature];
            let mut left_sum = 0.0;
            for position in 1..n {
                left_sum += self.targets[rows[position - 1]];
                if position < min_leaf || n - position < min_leaf {
                    continue;
                }
                let below = column[rows[position - 1]];
                let above = column[rows[position]];
                if below >= above {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / position as f64
                    + right_sum * right_sum / (n - position) as f64
                    - parent_score;
                if gain > best_gain {
                    best_gain = gain;
                    best = Some(Split {
                        feature,
                        position,
                        threshold: midpoint(below, above),
                    });
                }
            }
        }
        best
    }
}

fn midpoint(below: f64, above: f64) -> f64 {
    let mid = below + (above - below) / 2.0;
    if mid >= above {
        below
    } else {
        mid
    }
}

/// Row indices ordered by each column's values, ties broken by row index
pub(crate) fn presort(columns: &[Vec<f64>]) -> Vec<Vec<usize>> {
    columns
        .iter()
        .map(|column| {
            let mut rows: Vec<usize> = (0..column.len()).collect();
            rows.sort_by(|&a, &b| column[a].total_cmp(&column[b]).then(a.cmp(&b)));
            rows
        })
        .collect()
}
