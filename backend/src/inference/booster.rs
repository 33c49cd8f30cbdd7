//! Gradient-boosted tree classifier read from an XGBoost JSON model dump.
//!
//! Only the parts of the document needed for inference are parsed: the tree
//! arrays, the per-tree class assignment, the intercept and the objective.
//! Models trained with early stopping only use the trees up to their
//! recorded `best_iteration`.

use std::path::Path;

use serde::Deserialize;

use super::InferenceError;
use super::artifacts::ArtifactError;

#[derive(Debug, Deserialize)]
struct ModelDocument {
    learner: LearnerSection,
}

#[derive(Debug, Deserialize)]
struct LearnerSection {
    #[serde(default)]
    attributes: LearnerAttributes,
    gradient_booster: BoosterSection,
    learner_model_param: LearnerModelParam,
    objective: ObjectiveSection,
}

#[derive(Debug, Default, Deserialize)]
struct LearnerAttributes {
    #[serde(default)]
    best_iteration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoosterSection {
    #[serde(default)]
    name: String,
    model: Option<TreeEnsemble>,
}

#[derive(Debug, Deserialize)]
struct TreeEnsemble {
    trees: Vec<JsonTree>,
    tree_info: Vec<usize>,
    /// Tree offsets per boosting round, written by XGBoost 2.x.
    #[serde(default)]
    iteration_indptr: Option<Vec<usize>>,
    #[serde(default)]
    gbtree_model_param: Option<GbtreeModelParam>,
}

#[derive(Debug, Deserialize)]
struct GbtreeModelParam {
    #[serde(default)]
    num_parallel_tree: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonTree {
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<u64>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Int(i) => *i != 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LearnerModelParam {
    base_score: String,
    #[serde(default)]
    num_class: Option<String>,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectiveSection {
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// `multi:softprob` / `multi:softmax`: one margin per class, softmax on top.
    Softmax,
    /// `binary:logistic`: one margin, sigmoid gives the positive-class probability.
    Logistic,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        default_left: bool,
    },
    Leaf(f32),
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn from_json(tree: JsonTree, position: usize) -> Result<Self, ArtifactError> {
        let len = tree.left_children.len();
        if [
            tree.right_children.len(),
            tree.split_indices.len(),
            tree.split_conditions.len(),
            tree.default_left.len(),
        ]
        .iter()
        .any(|&other| other != len)
            || len == 0
        {
            return Err(ArtifactError::Format(format!(
                "tree {} has inconsistent node arrays",
                position
            )));
        }

        let mut nodes = Vec::with_capacity(len);
        for nid in 0..len {
            let left = tree.left_children[nid];
            let right = tree.right_children[nid];
            if left < 0 {
                nodes.push(Node::Leaf(tree.split_conditions[nid]));
                continue;
            }
            // Children always come after their parent, which also rules out cycles.
            let child = |id: i64| -> Result<usize, ArtifactError> {
                let id = usize::try_from(id).ok().filter(|&id| id > nid && id < len);
                id.ok_or_else(|| {
                    ArtifactError::Format(format!(
                        "tree {} node {} has an invalid child",
                        position, nid
                    ))
                })
            };
            nodes.push(Node::Split {
                feature: tree.split_indices[nid] as usize,
                threshold: tree.split_conditions[nid],
                left: child(left)?,
                right: child(right)?,
                default_left: tree.default_left[nid].is_set(),
            });
        }
        Ok(Self { nodes })
    }

    fn leaf_value(&self, features: &[f32]) -> f32 {
        let mut nid = 0;
        loop {
            match &self.nodes[nid] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let value = features[*feature];
                    nid = if value.is_nan() {
                        if *default_left { *left } else { *right }
                    } else if value < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn max_feature(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Split { feature, .. } => Some(*feature),
                Node::Leaf(_) => None,
            })
            .max()
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoostedTrees {
    trees: Vec<Tree>,
    tree_groups: Vec<usize>,
    base_margin: Vec<f32>,
    num_classes: usize,
    num_features: usize,
    objective: Objective,
}

impl GradientBoostedTrees {
    pub fn from_file(path: &Path) -> Result<Self, ArtifactError> {
        let content = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ArtifactError> {
        let document: ModelDocument = serde_json::from_str(content)?;
        let learner = document.learner;

        let objective = match learner.objective.name.as_str() {
            "multi:softprob" | "multi:softmax" => Objective::Softmax,
            "binary:logistic" => Objective::Logistic,
            other => {
                return Err(ArtifactError::Unsupported(format!(
                    "classifier objective '{}'",
                    other
                )));
            }
        };

        let mut ensemble = match (
            learner.gradient_booster.name.as_str(),
            learner.gradient_booster.model,
        ) {
            ("gbtree" | "", Some(model)) => model,
            (name, _) => {
                return Err(ArtifactError::Unsupported(format!("booster '{}'", name)));
            }
        };

        let num_classes = match objective {
            Objective::Softmax => parse_count(learner.learner_model_param.num_class.as_deref())?,
            Objective::Logistic => 2,
        };
        if num_classes < 2 {
            return Err(ArtifactError::Format(format!(
                "classifier declares {} classes",
                num_classes
            )));
        }
        let groups = match objective {
            Objective::Softmax => num_classes,
            Objective::Logistic => 1,
        };

        if ensemble.tree_info.len() != ensemble.trees.len() {
            return Err(ArtifactError::Format(format!(
                "{} trees but {} tree_info entries",
                ensemble.trees.len(),
                ensemble.tree_info.len()
            )));
        }
        if let Some(bad) = ensemble.tree_info.iter().find(|&&group| group >= groups) {
            return Err(ArtifactError::Format(format!(
                "tree assigned to output group {} of {}",
                bad, groups
            )));
        }

        if let Some(raw) = learner.attributes.best_iteration.as_deref() {
            let best_iteration = parse_count(Some(raw))?;
            let limit = trees_through_iteration(&ensemble, best_iteration, groups)?;
            if limit < ensemble.trees.len() {
                log::info!(
                    "Using {} of {} trees (best_iteration {})",
                    limit,
                    ensemble.trees.len(),
                    best_iteration
                );
                ensemble.trees.truncate(limit);
                ensemble.tree_info.truncate(limit);
            }
        }

        let trees = ensemble
            .trees
            .into_iter()
            .enumerate()
            .map(|(position, tree)| Tree::from_json(tree, position))
            .collect::<Result<Vec<_>, _>>()?;

        let base_score = parse_base_score(&learner.learner_model_param.base_score, groups)?;
        let base_margin = match objective {
            Objective::Softmax => base_score,
            Objective::Logistic => base_score.iter().map(|&p| logit(p)).collect(),
        };

        let num_features = parse_count(learner.learner_model_param.num_feature.as_deref())?;
        if let Some(max) = trees.iter().filter_map(Tree::max_feature).max() {
            if num_features != 0 && max >= num_features {
                return Err(ArtifactError::Format(format!(
                    "split on feature {} but model declares {} features",
                    max, num_features
                )));
            }
        }

        log::debug!(
            "Parsed {} trees for {} classes ({:?})",
            trees.len(),
            num_classes,
            objective
        );

        Ok(Self {
            trees,
            tree_groups: ensemble.tree_info,
            base_margin,
            num_classes,
            num_features,
            objective,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    /// Per-class probability distribution for one feature vector.
    pub fn predict_proba(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        self.check_width(features)?;

        let mut margins = self.base_margin.clone();
        for (tree, &group) in self.trees.iter().zip(&self.tree_groups) {
            margins[group] += tree.leaf_value(features);
        }
        if margins.iter().any(|m| !m.is_finite()) {
            return Err(InferenceError::Prediction(
                "classifier produced a non-finite margin".to_string(),
            ));
        }

        Ok(match self.objective {
            Objective::Softmax => softmax(&margins),
            Objective::Logistic => {
                let p = sigmoid(margins[0]);
                vec![1.0 - p, p]
            }
        })
    }

    fn check_width(&self, features: &[f32]) -> Result<(), InferenceError> {
        if self.num_features != 0 {
            if features.len() != self.num_features {
                return Err(InferenceError::Prediction(format!(
                    "feature vector has {} values but the classifier expects {}",
                    features.len(),
                    self.num_features
                )));
            }
            return Ok(());
        }

        let required = self
            .trees
            .iter()
            .filter_map(Tree::max_feature)
            .max()
            .map_or(0, |max| max + 1);
        if features.len() < required {
            return Err(InferenceError::Prediction(format!(
                "feature vector has {} values but the classifier splits on index {}",
                features.len(),
                required - 1
            )));
        }
        Ok(())
    }
}

/// Number of leading trees that make up rounds `0..=best_iteration`.
fn trees_through_iteration(
    ensemble: &TreeEnsemble,
    best_iteration: usize,
    groups: usize,
) -> Result<usize, ArtifactError> {
    let limit = match &ensemble.iteration_indptr {
        Some(indptr) if !indptr.is_empty() => indptr
            .get(best_iteration + 1)
            .copied()
            .unwrap_or(ensemble.trees.len()),
        _ => {
            let parallel = ensemble
                .gbtree_model_param
                .as_ref()
                .map(|param| parse_count(param.num_parallel_tree.as_deref()))
                .transpose()?
                .unwrap_or(0)
                .max(1);
            (best_iteration + 1) * groups * parallel
        }
    };
    Ok(limit.min(ensemble.trees.len()))
}

fn parse_count(raw: Option<&str>) -> Result<usize, ArtifactError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| ArtifactError::Format(format!("invalid count '{}'", value))),
    }
}

/// Accepts both a scalar ("5E-1") and the vector form ("[5E-1,5E-1]").
fn parse_base_score(raw: &str, groups: usize) -> Result<Vec<f32>, ArtifactError> {
    let values = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .map_err(|_| ArtifactError::Format(format!("invalid base_score '{}'", raw)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match values.len() {
        1 => Ok(vec![values[0]; groups]),
        n if n == groups => Ok(values),
        n => Err(ArtifactError::Format(format!(
            "base_score has {} values for {} output groups",
            n, groups
        ))),
    }
}

fn softmax(margins: &[f32]) -> Vec<f32> {
    let max = margins.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = margins.iter().map(|m| (m - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f32) -> f32 {
    let p = p.clamp(1e-7, 1.0 - 1e-7);
    (p / (1.0 - p)).ln()
}
