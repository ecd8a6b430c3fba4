use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::PredictError;
use crate::io_struct::{encode_csv, parse_csv};

/// A loaded model implementation.
///
/// The artifact's `model_type` field selects which implementation is
/// constructed at startup; after that the contract is fixed. Scoring is
/// read-only and side-effect free, so identical inputs yield identical
/// outputs for the lifetime of the process.
pub trait Model: Send + Sync {
    fn num_features(&self) -> usize;
    fn score(&self, row: &[f32]) -> Result<f32, PredictError>;
}

/// One node of a regression tree. Split nodes route on `row[feature] <
/// threshold` (left when true); everything else is a leaf contribution.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f32,
    },
}

#[derive(Debug, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    /// Walks from the root to a leaf. A malformed structure (child index out
    /// of range, or a walk longer than the node count) surfaces as an
    /// inference error rather than a panic.
    fn evaluate(&self, row: &[f32]) -> Result<f32, PredictError> {
        let mut idx = 0usize;
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value }) => return Ok(*value),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = row.get(*feature).copied().ok_or_else(|| {
                        PredictError::Inference(format!(
                            "split references feature {} beyond input width {}",
                            feature,
                            row.len()
                        ))
                    })?;
                    idx = if x < *threshold { *left } else { *right };
                }
                None => {
                    return Err(PredictError::Inference(format!(
                        "node index {} out of range ({} nodes)",
                        idx,
                        self.nodes.len()
                    )));
                }
            }
        }
        Err(PredictError::Inference(
            "tree walk did not reach a leaf".to_string(),
        ))
    }
}

/// Boosted regression trees: output = base_score + Σ per-tree leaf values.
#[derive(Debug, Deserialize)]
pub struct TreeEnsemble {
    pub num_features: usize,
    #[serde(default)]
    pub base_score: f32,
    pub trees: Vec<Tree>,
}

impl Model for TreeEnsemble {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn score(&self, row: &[f32]) -> Result<f32, PredictError> {
        let mut acc = self.base_score;
        for tree in &self.trees {
            acc += tree.evaluate(row)?;
        }
        Ok(acc)
    }
}

/// Linear booster: output = base_score + bias + Σ feature × weight.
#[derive(Debug, Deserialize)]
pub struct LinearModel {
    pub num_features: usize,
    #[serde(default)]
    pub base_score: f32,
    pub weights: Vec<f32>,
    #[serde(default)]
    pub bias: f32,
}

impl Model for LinearModel {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn score(&self, row: &[f32]) -> Result<f32, PredictError> {
        let dot: f32 = row.iter().zip(&self.weights).map(|(x, w)| x * w).sum();
        Ok(self.base_score + self.bias + dot)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
enum Artifact {
    TreeEnsemble(TreeEnsemble),
    Linear(LinearModel),
}

/// Owns the model artifact and performs inference on parsed CSV batches.
pub struct Predictor {
    model: Box<dyn Model>,
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("num_features", &self.model.num_features())
            .finish()
    }
}

impl Predictor {
    /// Reads and parses the artifact at `path`. Failures here are fatal: the
    /// process cannot reach ready state without its model.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read(path)
            .with_context(|| format!("model artifact not readable at {}", path.display()))?;
        Self::from_slice(&raw)
            .with_context(|| format!("model artifact at {} is invalid", path.display()))
    }

    /// Parses an artifact document and checks its shape is self-consistent.
    pub fn from_slice(raw: &[u8]) -> anyhow::Result<Self> {
        let artifact: Artifact =
            serde_json::from_slice(raw).context("failed to parse artifact JSON")?;
        let model: Box<dyn Model> = match artifact {
            Artifact::TreeEnsemble(m) => {
                anyhow::ensure!(m.num_features > 0, "tree ensemble declares zero features");
                anyhow::ensure!(!m.trees.is_empty(), "tree ensemble contains no trees");
                for (i, tree) in m.trees.iter().enumerate() {
                    anyhow::ensure!(!tree.nodes.is_empty(), "tree {} has no nodes", i);
                }
                Box::new(m)
            }
            Artifact::Linear(m) => {
                anyhow::ensure!(m.num_features > 0, "linear model declares zero features");
                anyhow::ensure!(
                    m.weights.len() == m.num_features,
                    "linear model has {} weights for {} features",
                    m.weights.len(),
                    m.num_features
                );
                Box::new(m)
            }
        };
        Ok(Predictor { model })
    }

    pub fn num_features(&self) -> usize {
        self.model.num_features()
    }

    /// Parse, infer, serialize. One output line per input line; parse
    /// failures never reach the model.
    pub fn predict(&self, raw: &[u8]) -> Result<String, PredictError> {
        let batch = parse_csv(raw, self.model.num_features())?;
        let mut outputs = Vec::with_capacity(batch.len());
        for row in &batch.rows {
            outputs.push(self.model.score(row)?);
        }
        Ok(encode_csv(&outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump_artifact() -> Vec<u8> {
        // Single split on feature 0 at 0.5: left leaf -1, right leaf 1.
        serde_json::to_vec(&serde_json::json!({
            "model_type": "tree_ensemble",
            "num_features": 4,
            "base_score": 0.5,
            "trees": [
                {
                    "nodes": [
                        { "feature": 0, "threshold": 0.5, "left": 1, "right": 2 },
                        { "value": -1.0 },
                        { "value": 1.0 }
                    ]
                }
            ]
        }))
        .unwrap()
    }

    fn linear_artifact() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "model_type": "linear",
            "num_features": 4,
            "weights": [1.0, 1.0, 1.0, 1.0],
            "bias": 0.0
        }))
        .unwrap()
    }

    #[test]
    fn stump_routes_left_and_right() {
        let predictor = Predictor::from_slice(&stump_artifact()).unwrap();
        assert_eq!(predictor.predict(b"0,9,9,9").unwrap(), "-0.5\n");
        assert_eq!(predictor.predict(b"1,9,9,9").unwrap(), "1.5\n");
    }

    #[test]
    fn four_feature_input_yields_exactly_one_line() {
        let predictor = Predictor::from_slice(&stump_artifact()).unwrap();
        let out = predictor.predict(b"1,2,3,4").unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.trim().parse::<f32>().is_ok());
    }

    #[test]
    fn batch_output_matches_input_line_count() {
        let predictor = Predictor::from_slice(&linear_artifact()).unwrap();
        let out = predictor.predict(b"1,2,3,4\n0,0,0,0\n1,1,1,1\n").unwrap();
        assert_eq!(out, "10\n0\n4\n");
    }

    #[test]
    fn short_row_is_an_input_error_not_a_crash() {
        let predictor = Predictor::from_slice(&stump_artifact()).unwrap();
        assert!(matches!(
            predictor.predict(b"1,2,3"),
            Err(PredictError::InputFormat(_))
        ));
    }

    #[test]
    fn predict_is_idempotent() {
        let predictor = Predictor::from_slice(&stump_artifact()).unwrap();
        let first = predictor.predict(b"0.4,1,2,3").unwrap();
        let second = predictor.predict(b"0.4,1,2,3").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn linear_model_scores_weighted_sum() {
        let predictor = Predictor::from_slice(&linear_artifact()).unwrap();
        assert_eq!(predictor.predict(b"1,2,3,4").unwrap(), "10\n");
    }

    #[test]
    fn load_fails_on_missing_file() {
        let err = Predictor::load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(err.to_string().contains("not readable"));
    }

    #[test]
    fn load_reads_artifact_from_disk() {
        let path = std::env::temp_dir().join(format!("tabserve-model-{}.json", std::process::id()));
        std::fs::write(&path, stump_artifact()).unwrap();
        let predictor = Predictor::load(&path).unwrap();
        assert_eq!(predictor.num_features(), 4);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn garbage_artifact_is_rejected() {
        assert!(Predictor::from_slice(b"not json at all").is_err());
    }

    #[test]
    fn unknown_model_type_is_rejected() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "model_type": "neural_net",
            "num_features": 4
        }))
        .unwrap();
        assert!(Predictor::from_slice(&raw).is_err());
    }

    #[test]
    fn linear_weight_count_must_match_feature_count() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "model_type": "linear",
            "num_features": 4,
            "weights": [1.0, 2.0]
        }))
        .unwrap();
        let err = Predictor::from_slice(&raw).unwrap_err();
        assert!(format!("{:#}", err).contains("2 weights for 4 features"));
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "model_type": "tree_ensemble",
            "num_features": 4,
            "trees": []
        }))
        .unwrap();
        assert!(Predictor::from_slice(&raw).is_err());
    }

    #[test]
    fn dangling_child_index_is_an_inference_error() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "model_type": "tree_ensemble",
            "num_features": 1,
            "trees": [
                {
                    "nodes": [
                        { "feature": 0, "threshold": 0.5, "left": 7, "right": 8 }
                    ]
                }
            ]
        }))
        .unwrap();
        let predictor = Predictor::from_slice(&raw).unwrap();
        assert!(matches!(
            predictor.predict(b"1"),
            Err(PredictError::Inference(_))
        ));
    }
}
