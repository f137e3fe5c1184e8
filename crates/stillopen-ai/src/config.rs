//! Training hyper-parameters.
//!
//! Every field has a default, so an empty TOML table is a valid config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrainError;

/// Deepest tree the artifact format carries. Each level is one JSON nesting
/// level, and readers stop at 128.
pub const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Seeds sampling, fold assignment and every tree.
    pub seed: u64,
    /// Maximum Overture records mixed into the training set.
    pub overture_cap: usize,
    /// Categories retained by the encoder, `"other"` excluded.
    pub top_k: usize,
    /// Cross-validation folds. Values below 2 skip cross-validation.
    pub folds: usize,
    /// Instant staleness is measured against. `None` means now.
    pub reference_time: Option<DateTime<Utc>>,
    pub forest: ForestConfig,
    pub threshold: ThresholdGrid,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            overture_cap: 5_000,
            top_k: 50,
            folds: 5,
            reference_time: None,
            forest: ForestConfig::default(),
            threshold: ThresholdGrid::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.forest.n_estimators == 0 {
            return Err(TrainError::InvalidConfig("forest.n_estimators must be > 0".into()));
        }
        if self.forest.max_depth == 0 || self.forest.max_depth > MAX_TREE_DEPTH {
            return Err(TrainError::InvalidConfig(format!(
                "forest.max_depth must be in 1..={MAX_TREE_DEPTH}"
            )));
        }
        if self.forest.min_samples_leaf == 0 {
            return Err(TrainError::InvalidConfig("forest.min_samples_leaf must be > 0".into()));
        }
        let fraction = self.forest.feature_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(TrainError::InvalidConfig(format!(
                "forest.feature_fraction must be in (0, 1], got {fraction}"
            )));
        }
        self.threshold.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Share of the feature columns each tree is fitted on.
    pub feature_fraction: f64,
    /// Worker threads for tree fitting. `None` uses available parallelism.
    pub threads: Option<usize>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 12,
            min_samples_split: 10,
            min_samples_leaf: 5,
            feature_fraction: 0.7,
            threads: None,
        }
    }
}

/// Inclusive grid of candidate decision thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdGrid {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl Default for ThresholdGrid {
    fn default() -> Self {
        Self { start: 0.30, end: 0.70, step: 0.01 }
    }
}

impl ThresholdGrid {
    fn validate(&self) -> Result<(), TrainError> {
        let ok = self.step > 0.0
            && self.start.is_finite()
            && self.end.is_finite()
            && self.start <= self.end
            && (0.0..=1.0).contains(&self.start)
            && (0.0..=1.0).contains(&self.end);
        if ok {
            Ok(())
        } else {
            Err(TrainError::InvalidConfig(format!(
                "threshold grid {}..={} step {} is not a valid subrange of [0, 1]",
                self.start, self.end, self.step
            )))
        }
    }

    /// Candidate thresholds in ascending order.
    ///
    /// Points are computed as `start + i * step` and rounded to 1e-9 so the
    /// grid does not accumulate float error (`0.30, 0.31, ...` rather than
    /// `0.30000000000000004`).
    pub fn points(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.start > self.end {
            return vec![self.start];
        }
        let n = ((self.end - self.start) / self.step + 1e-9).floor() as usize;
        (0..=n)
            .map(|i| {
                let t = self.start + i as f64 * self.step;
                (t * 1e9).round() / 1e9
            })
            .collect()
    }
}
