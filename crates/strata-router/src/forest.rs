//! Learned routing: a decision-tree ensemble over cheap query features.
//!
//! Trees are trained offline and shipped as JSON/YAML. Features, in order:
//! one presence flag per table in `table_order`, the referenced table count,
//! then the WHERE predicate count.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use strata_core::engine::Engine;

use crate::query_rep::QueryRep;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// Goes `left` when `features[feature] <= threshold`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Scores in Aurora, Redshift, Athena order; higher is better.
    Leaf { scores: [f64; 3] },
}

/// Nodes are stored flat; index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// `None` when the tree is malformed (dangling index or a cycle).
    pub fn evaluate(&self, features: &[f64]) -> Option<[f64; 3]> {
        let mut idx = 0;
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx)? {
                TreeNode::Leaf { scores } => return Some(*scores),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = features.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    pub table_order: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

impl ForestModel {
    pub fn features(&self, query: &QueryRep) -> Vec<f64> {
        let tables = query.tables();
        let mut out: Vec<f64> = self
            .table_order
            .iter()
            .map(|t| if tables.contains(t) { 1.0 } else { 0.0 })
            .collect();
        out.push(tables.len() as f64);
        out.push(query.predicate_count() as f64);
        out
    }

    /// Engines by descending mean score. Ties keep the fixed engine order.
    pub fn rank(&self, query: &QueryRep) -> Vec<Engine> {
        let features = self.features(query);
        let mut sums = [0.0f64; 3];
        let mut n = 0usize;
        for tree in &self.trees {
            if let Some(scores) = tree.evaluate(&features) {
                for (s, v) in sums.iter_mut().zip(scores) {
                    *s += v;
                }
                n += 1;
            }
        }
        if n > 0 {
            for s in &mut sums {
                *s /= n as f64;
            }
        }
        let mut ranked = Engine::ALL.to_vec();
        // Stable sort keeps Aurora, Redshift, Athena order among equals.
        ranked.sort_by(|a, b| sums[b.index()].total_cmp(&sums[a.index()]));
        ranked
    }
}

/// Trained models by key, as referenced from `RoutingPolicy::LearnedForest`.
pub type ModelRegistry = BTreeMap<String, Arc<ForestModel>>;
