//! Bagged decision-tree ensemble for the binary open/closed task.
//!
//! Members are `linfa-trees` CART trees (Gini split quality, per-sample
//! weights honored, so the trainer's class-balanced weights reach every
//! split). Each member is fitted on a bootstrap sample of the rows and a
//! random subset of the feature columns. `P(open)` is the share of members
//! voting open.
//!
//! Member seeds are drawn up front from the forest seed, so the fitted
//! forest does not depend on how members are spread over worker threads.

use std::num::NonZeroUsize;

use linfa::prelude::{Dataset, Fit, Predict};
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ForestConfig;
use crate::error::TrainError;
use crate::metrics::OPEN;

/// The model interface seen by the inference service.
///
/// Every model yields a hard label; only models that can also estimate
/// `P(open)` override [`predict_open_proba`](PlaceModel::predict_open_proba).
pub trait PlaceModel {
    /// 1 = open, 0 = closed.
    fn predict_label(&self, x: &[f64]) -> u8;

    fn predict_open_proba(&self, _x: &[f64]) -> Option<f64> {
        None
    }
}

/// Serialized model variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    Forest(RandomForest),
    /// Fitted on a single-class training set. Hard label only.
    Constant { label: u8 },
}

impl Model {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Forest(_) => "forest",
            Self::Constant { .. } => "constant",
        }
    }

    pub fn feature_importances(&self) -> Option<&[f64]> {
        match self {
            Self::Forest(f) => Some(&f.importances),
            Self::Constant { .. } => None,
        }
    }

    /// Structural checks for a model read from disk, against a model input
    /// of `n_inputs` features. A model that passes never panics at predict
    /// time.
    pub fn validate(&self, n_inputs: usize) -> Result<(), String> {
        match self {
            Self::Forest(f) => {
                if f.n_features != n_inputs {
                    return Err(format!(
                        "forest expects {} features, artifact lists {n_inputs}",
                        f.n_features
                    ));
                }
                f.validate()
            }
            Self::Constant { label } if *label > OPEN => Err(format!("constant label {label} is not 0 or 1")),
            Self::Constant { .. } => Ok(()),
        }
    }
}

impl PlaceModel for Model {
    fn predict_label(&self, x: &[f64]) -> u8 {
        match self {
            Self::Forest(f) => f.predict_label(x),
            Self::Constant { label } => *label,
        }
    }

    fn predict_open_proba(&self, x: &[f64]) -> Option<f64> {
        match self {
            Self::Forest(f) => f.predict_open_proba(x),
            Self::Constant { .. } => None,
        }
    }
}

type Tree = DecisionTree<f64, usize>;

/// One tree and the forest columns it was fitted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Member {
    /// Forest column of each tree column, ascending.
    features: Vec<usize>,
    tree: Tree,
}

impl Member {
    fn votes(&self, rows: ArrayView2<'_, f64>) -> Array1<usize> {
        let columns = rows.select(Axis(1), &self.features);
        self.tree.predict(&columns)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_features: usize,
    members: Vec<Member>,
    /// Mean decrease in impurity per feature, normalized to sum to 1.
    pub importances: Vec<f64>,
}

impl RandomForest {
    /// Fit on `x` (one row per sample) with labels `y` (1 open, 0 closed)
    /// and per-sample `weights`.
    pub fn fit<'a>(
        x: ArrayView2<'a, f64>,
        y: &'a [u8],
        weights: &'a [f64],
        config: &ForestConfig,
        seed: u64,
    ) -> Result<Self, TrainError> {
        if y.is_empty() {
            return Err(TrainError::EmptyTrainingSet);
        }
        debug_assert_eq!(x.nrows(), y.len());
        debug_assert_eq!(x.nrows(), weights.len());

        let n_features = x.ncols();
        let max_features = ((n_features as f64 * config.feature_fraction).ceil() as usize).clamp(1, n_features.max(1));

        let mut seeder = StdRng::seed_from_u64(seed);
        let seeds: Vec<u64> = (0..config.n_estimators).map(|_| seeder.r#gen()).collect();

        let threads = config
            .threads
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get))
            .clamp(1, seeds.len().max(1));
        let chunk = seeds.len().div_ceil(threads).max(1);

        let data = TrainingData { x, y, weights };
        let params = MemberParams {
            max_features,
            max_depth: config.max_depth,
            min_weight_split: config.min_samples_split.max(2) as f32,
            min_weight_leaf: config.min_samples_leaf.max(1) as f32,
        };

        let fitted: Vec<Result<Member, String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = seeds
                .chunks(chunk)
                .map(|chunk_seeds| {
                    let data = &data;
                    let params = &params;
                    scope.spawn(move || {
                        chunk_seeds
                            .iter()
                            .map(|s| fit_member(data, params, *s))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| match h.join() {
                    Ok(members) => members,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });
        let members = fitted.into_iter().collect::<Result<Vec<_>, _>>().map_err(TrainError::Fit)?;

        let mut importances = vec![0.0; n_features];
        for m in &members {
            for (&column, &v) in m.features.iter().zip(&m.tree.feature_importance()) {
                // A single-leaf tree reports 0/0.
                if v.is_finite() {
                    importances[column] += v;
                }
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in &mut importances {
                *v /= total;
            }
        }

        debug!(trees = members.len(), threads, max_features, "fitted random forest");

        Ok(Self { n_features, members, importances })
    }

    pub fn n_trees(&self) -> usize {
        self.members.len()
    }

    /// `P(open)` for one feature vector. Missing trailing values read as 0.
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let row = Array2::from_shape_fn((1, self.n_features), |(_, j)| x.get(j).copied().unwrap_or(0.0));
        self.predict_proba_rows(row.view())[0]
    }

    /// `P(open)` for every row of `rows`.
    ///
    /// Rows of the wrong width, or an empty forest, answer 0.5.
    pub fn predict_proba_rows(&self, rows: ArrayView2<'_, f64>) -> Vec<f64> {
        if self.members.is_empty() || rows.ncols() != self.n_features {
            return vec![0.5; rows.nrows()];
        }
        let mut open = vec![0usize; rows.nrows()];
        for m in &self.members {
            for (count, &vote) in open.iter_mut().zip(m.votes(rows).iter()) {
                if vote == usize::from(OPEN) {
                    *count += 1;
                }
            }
        }
        let total = self.members.len() as f64;
        open.into_iter().map(|c| c as f64 / total).collect()
    }

    fn validate(&self) -> Result<(), String> {
        if self.members.is_empty() {
            return Err("forest has no trees".into());
        }
        if !self.importances.is_empty() && self.importances.len() != self.n_features {
            return Err(format!(
                "{} importances for {} features",
                self.importances.len(),
                self.n_features
            ));
        }
        for (i, m) in self.members.iter().enumerate() {
            if m.features.is_empty() {
                return Err(format!("tree {i} reads no features"));
            }
            if let Some(f) = m.features.iter().find(|&&f| f >= self.n_features) {
                return Err(format!("tree {i} reads feature {f} of {}", self.n_features));
            }
            if let Some(c) = m.tree.features().into_iter().find(|&c| c >= m.features.len()) {
                return Err(format!("tree {i} splits on column {c} of {}", m.features.len()));
            }
            for node in m.tree.iter_nodes() {
                if node.is_leaf() {
                    if let Some(label) = node.prediction()
                        && label > usize::from(OPEN)
                    {
                        return Err(format!("tree {i} predicts label {label}"));
                    }
                } else if node.children().iter().any(|c| c.is_none()) {
                    return Err(format!("tree {i} has a split without two children"));
                }
            }
        }
        Ok(())
    }
}

impl PlaceModel for RandomForest {
    fn predict_label(&self, x: &[f64]) -> u8 {
        u8::from(self.predict_proba(x) >= 0.5)
    }

    fn predict_open_proba(&self, x: &[f64]) -> Option<f64> {
        Some(self.predict_proba(x))
    }
}

/// `n / (2 * n_class)` per sample. A class absent from `y` gets no weight.
pub fn class_balanced_weights(y: &[u8]) -> Vec<f64> {
    let n = y.len() as f64;
    let n_open = y.iter().filter(|&&l| l == OPEN).count() as f64;
    let n_closed = n - n_open;
    y.iter()
        .map(|&l| {
            let nc = if l == OPEN { n_open } else { n_closed };
            if nc > 0.0 { n / (2.0 * nc) } else { 0.0 }
        })
        .collect()
}

struct TrainingData<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [u8],
    weights: &'a [f64],
}

struct MemberParams {
    max_features: usize,
    max_depth: usize,
    /// Class-balanced weights sum to the sample count, so the sample-count
    /// limits carry over as weight limits.
    min_weight_split: f32,
    min_weight_leaf: f32,
}

fn fit_member(data: &TrainingData<'_>, params: &MemberParams, seed: u64) -> Result<Member, String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = data.y.len();
    let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();

    let mut features: Vec<usize> = (0..data.x.ncols()).collect();
    features.shuffle(&mut rng);
    features.truncate(params.max_features);
    features.sort_unstable();

    let records = data.x.select(Axis(0), &sample).select(Axis(1), &features);
    let targets: Array1<usize> = sample.iter().map(|&i| usize::from(data.y[i])).collect();
    let weights: Array1<f32> = sample.iter().map(|&i| data.weights[i] as f32).collect();
    let dataset = Dataset::new(records, targets).with_weights(weights);

    let tree = DecisionTree::<f64, usize>::params()
        .split_quality(SplitQuality::Gini)
        .max_depth(Some(params.max_depth))
        .min_weight_split(params.min_weight_split)
        .min_weight_leaf(params.min_weight_leaf)
        .fit(&dataset)
        .map_err(|e| e.to_string())?;
    Ok(Member { features, tree })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    /// A tree that answers `label` whatever it reads.
    fn constant_member(label: usize) -> Member {
        let dataset = Dataset::new(array![[0.0], [1.0]], array![label, label]);
        let tree = DecisionTree::<f64, usize>::params().fit(&dataset).unwrap();
        Member { features: vec![0], tree }
    }

    /// A tree that answers open iff forest column `feature` is at least 0.5.
    fn threshold_member(feature: usize) -> Member {
        let dataset = Dataset::new(array![[0.0], [1.0], [0.0], [1.0]], array![0, 1, 0, 1]);
        let tree = DecisionTree::<f64, usize>::params()
            .max_depth(Some(1))
            .min_weight_split(2.0)
            .min_weight_leaf(1.0)
            .fit(&dataset)
            .unwrap();
        Member { features: vec![feature], tree }
    }

    fn forest(n_features: usize, members: Vec<Member>) -> Model {
        Model::Forest(RandomForest { n_features, members, importances: Vec::new() })
    }

    /// A forest over `n_features` inputs answering `open / total` for any row.
    pub(crate) fn voting_forest(n_features: usize, open: usize, total: usize) -> Model {
        let members = (0..total)
            .map(|i| constant_member(usize::from(i < open)))
            .collect();
        forest(n_features, members)
    }

    /// `open` trees reading column `feature` plus `closed` always-closed trees.
    pub(crate) fn feature_forest(n_features: usize, feature: usize, open: usize, closed: usize) -> Model {
        let mut members: Vec<Member> = (0..open).map(|_| threshold_member(feature)).collect();
        members.extend((0..closed).map(|_| constant_member(0)));
        forest(n_features, members)
    }

    /// Open iff feature 0 (has_website-like) is set; feature 1 is noise.
    fn separable() -> (Array2<f64>, Vec<u8>) {
        let y: Vec<u8> = (0..60).map(|i| u8::from(i % 3 != 0)).collect();
        let x = Array2::from_shape_fn((60, 2), |(i, j)| if j == 0 { f64::from(y[i]) } else { (i % 7) as f64 });
        (x, y)
    }

    fn small_config() -> ForestConfig {
        ForestConfig {
            n_estimators: 15,
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
            feature_fraction: 1.0,
            threads: Some(3),
        }
    }

    fn fitted(config: &ForestConfig, seed: u64) -> RandomForest {
        let (x, y) = separable();
        let w = class_balanced_weights(&y);
        RandomForest::fit(x.view(), &y, &w, config, seed).unwrap()
    }

    #[test]
    fn learns_separable_data() {
        let forest = fitted(&small_config(), 42);
        assert_eq!(forest.n_trees(), 15);
        assert!(forest.predict_proba(&[1.0, 3.0]) > 0.8);
        assert!(forest.predict_proba(&[0.0, 3.0]) < 0.2);
        assert_eq!(forest.predict_label(&[1.0, 0.0]), 1);
        assert_eq!(forest.predict_label(&[0.0, 0.0]), 0);
    }

    #[test]
    fn batch_and_single_row_agree() {
        let forest = fitted(&small_config(), 42);
        let (x, _) = separable();
        let batch = forest.predict_proba_rows(x.view());
        for (row, p) in x.rows().into_iter().zip(&batch).take(10) {
            assert_eq!(forest.predict_proba(&row.to_vec()), *p);
        }
    }

    #[test]
    fn informative_feature_dominates_importance() {
        let forest = fitted(&small_config(), 42);
        assert!(forest.importances[0] > forest.importances[1]);
        let total: f64 = forest.importances.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fit_is_deterministic_across_thread_counts() {
        let mut one = small_config();
        one.threads = Some(1);
        let a = fitted(&one, 7);
        let b = fitted(&small_config(), 7);
        assert_eq!(serde_json::to_value(&a).unwrap(), serde_json::to_value(&b).unwrap());
    }

    #[test]
    fn feature_subsets_stay_in_range() {
        let mut cfg = small_config();
        cfg.feature_fraction = 0.5;
        let forest = fitted(&cfg, 11);
        assert!(forest.members.iter().all(|m| m.features.len() == 1 && m.features[0] < 2));
        assert!(Model::Forest(forest).validate(2).is_ok());
    }

    #[test]
    fn empty_training_set_is_an_error() {
        let x = Array2::<f64>::zeros((0, 2));
        let err = RandomForest::fit(x.view(), &[], &[], &small_config(), 1).unwrap_err();
        assert!(matches!(err, TrainError::EmptyTrainingSet));
    }

    #[test]
    fn balanced_weights() {
        let w = class_balanced_weights(&[1, 1, 1, 0]);
        assert_eq!(w, vec![4.0 / 6.0, 4.0 / 6.0, 4.0 / 6.0, 2.0]);
        let open_total: f64 = w[..3].iter().sum();
        assert!((open_total - w[3]).abs() < 1e-12);
    }

    #[test]
    fn constant_model_has_no_probability() {
        let m = Model::Constant { label: 1 };
        assert_eq!(m.predict_label(&[0.0; 4]), 1);
        assert_eq!(m.predict_open_proba(&[0.0; 4]), None);
        assert!(m.feature_importances().is_none());
        assert!(m.validate(4).is_ok());
        assert!(Model::Constant { label: 2 }.validate(4).is_err());
    }

    #[test]
    fn votes_give_probability() {
        let m = voting_forest(3, 11, 20);
        assert_eq!(m.predict_open_proba(&[0.0; 3]), Some(0.55));
        let m = feature_forest(3, 2, 3, 1);
        assert_eq!(m.predict_open_proba(&[0.0, 0.0, 1.0]), Some(0.75));
        assert_eq!(m.predict_open_proba(&[1.0, 1.0, 0.0]), Some(0.0));
    }

    #[test]
    fn model_serde_round_trip() {
        let mut cfg = small_config();
        cfg.n_estimators = 3;
        let model = Model::Forest(fitted(&cfg, 3));
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["kind"], "forest");
        let back: Model = serde_json::from_value(json).unwrap();
        assert!(back.validate(2).is_ok());
        for row in [[1.0, 0.0], [0.0, 5.0], [1.0, 6.0]] {
            assert_eq!(back.predict_open_proba(&row), model.predict_open_proba(&row));
        }
    }

    #[test]
    fn short_feature_vector_reads_missing_as_zero() {
        let forest = fitted(&small_config(), 42);
        let p = forest.predict_proba(&[]);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn validate_rejects_structural_damage() {
        let empty: Model = serde_json::from_value(json!({
            "kind": "forest",
            "n_features": 2,
            "members": [],
            "importances": []
        }))
        .unwrap();
        assert!(empty.validate(2).is_err());

        let good = serde_json::to_value(Model::Forest(fitted(&small_config(), 5))).unwrap();
        assert!(serde_json::from_value::<Model>(good.clone()).unwrap().validate(2).is_ok());
        assert!(serde_json::from_value::<Model>(good.clone()).unwrap().validate(3).is_err());

        let mut out_of_range = good.clone();
        out_of_range["members"][0]["features"] = json!([0, 9]);
        assert!(serde_json::from_value::<Model>(out_of_range).unwrap().validate(2).is_err());

        let mut no_columns = good.clone();
        no_columns["members"][0]["features"] = json!([]);
        assert!(serde_json::from_value::<Model>(no_columns).unwrap().validate(2).is_err());

        let mut importances = good;
        importances["importances"] = json!([1.0]);
        assert!(serde_json::from_value::<Model>(importances).unwrap().validate(2).is_err());
    }
}
