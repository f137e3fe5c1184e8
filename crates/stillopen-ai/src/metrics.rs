//! Binary classification metrics and the decision-threshold sweep.
//!
//! Labels follow the model convention: 1 open, 0 closed. Probabilities are
//! always `P(open)`.
//!
//! Accuracy and ROC-AUC come from `linfa::metrics`. Class F1 is counted here:
//! the sweep needs the closed-class score at every grid point, and linfa's
//! binary confusion matrix reports a single fixed positive class.

use linfa::dataset::Pr;
use linfa::metrics::{BinaryClassification, ToConfusionMatrix};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

pub const CLOSED: u8 = 0;
pub const OPEN: u8 = 1;

/// The threshold used when calibration is impossible or finds nothing.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// A record is closed when `P(open) < threshold`.
pub fn classify_with_threshold(p_open: f64, threshold: f64) -> u8 {
    if p_open < threshold { CLOSED } else { OPEN }
}

pub fn accuracy(y_true: &[u8], y_pred: &[u8]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let truth: Array1<usize> = y_true.iter().map(|&l| usize::from(l)).collect();
    let pred: Array1<usize> = y_pred.iter().map(|&l| usize::from(l)).collect();
    pred.confusion_matrix(truth.view())
        .map_or(0.0, |cm| f64::from(cm.accuracy()))
}

/// F1 treating `positive` as the positive class. 0 when undefined.
pub fn f1_score(y_true: &[u8], y_pred: &[u8], positive: u8) -> f64 {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == positive, p == positive) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let denom = 2 * tp + fp + fn_;
    if denom == 0 { 0.0 } else { (2 * tp) as f64 / denom as f64 }
}

pub fn macro_f1(y_true: &[u8], y_pred: &[u8]) -> f64 {
    (f1_score(y_true, y_pred, OPEN) + f1_score(y_true, y_pred, CLOSED)) / 2.0
}

/// Area under the ROC curve for `P(open)` scores. Tied scores form one
/// diagonal step. `None` when either class is absent.
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = y_true.iter().filter(|&&y| y == OPEN).count();
    if n_pos == 0 || n_pos == y_true.len() {
        return None;
    }
    let probs: Array1<Pr> = scores.iter().map(|&s| Pr::new(s.clamp(0.0, 1.0) as f32)).collect();
    let truth: Vec<bool> = y_true.iter().map(|&y| y == OPEN).collect();
    let roc = probs.roc(truth.as_slice()).ok()?;
    Some(f64::from(roc.area_under_curve()))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdChoice {
    pub threshold: f64,
    pub closed_f1: f64,
}

/// Pick the grid threshold maximizing closed-class F1.
///
/// The first maximum wins. When no threshold reaches a positive F1 the
/// result is [`DEFAULT_THRESHOLD`] with its own (zero) F1.
pub fn sweep_threshold(y_true: &[u8], p_open: &[f64], grid: &[f64]) -> ThresholdChoice {
    let f1_at = |t: f64| {
        let pred: Vec<u8> = p_open.iter().map(|&p| classify_with_threshold(p, t)).collect();
        f1_score(y_true, &pred, CLOSED)
    };

    let mut best = ThresholdChoice { threshold: DEFAULT_THRESHOLD, closed_f1: 0.0 };
    for &t in grid {
        let f1 = f1_at(t);
        if f1 > best.closed_f1 {
            best = ThresholdChoice { threshold: t, closed_f1: f1 };
        }
    }
    if best.closed_f1 == 0.0 {
        best = ThresholdChoice { threshold: DEFAULT_THRESHOLD, closed_f1: f1_at(DEFAULT_THRESHOLD) };
    }
    best
}

/// Mean and population standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanStd {
    pub mean: f64,
    pub std: f64,
}

impl MeanStd {
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self { mean, std: var.sqrt() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdGrid;

    #[test]
    fn threshold_rule_is_strict() {
        assert_eq!(classify_with_threshold(0.55, 0.62), CLOSED);
        assert_eq!(classify_with_threshold(0.62, 0.62), OPEN);
        assert_eq!(classify_with_threshold(0.9, 0.62), OPEN);
    }

    #[test]
    fn closed_predictions_monotone_in_threshold() {
        let probs = [0.05, 0.31, 0.44, 0.5, 0.58, 0.63, 0.69, 0.92];
        let grid = ThresholdGrid::default().points();
        let mut prev = 0;
        for t in grid {
            let closed = probs
                .iter()
                .filter(|&&p| classify_with_threshold(p, t) == CLOSED)
                .count();
            assert!(closed >= prev, "closed count dropped at t={t}");
            prev = closed;
        }
    }

    #[test]
    fn f1_and_accuracy() {
        let y = [1, 1, 0, 0];
        let p = [1, 0, 0, 1];
        assert_eq!(accuracy(&y, &p), 0.5);
        assert_eq!(f1_score(&y, &p, OPEN), 0.5);
        assert_eq!(f1_score(&y, &p, CLOSED), 0.5);
        assert_eq!(macro_f1(&y, &p), 0.5);
        assert_eq!(f1_score(&[1, 1], &[1, 1], CLOSED), 0.0);
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-6)
    }

    #[test]
    fn auc_perfect_reversed_and_ties() {
        let y = [0, 0, 1, 1];
        assert!(close(roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]), 1.0));
        assert!(close(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]), 0.0));
        assert!(close(roc_auc(&y, &[0.5, 0.5, 0.5, 0.5]), 0.5));
        assert!(close(roc_auc(&[0, 0, 1, 1], &[0.1, 0.5, 0.3, 0.8]), 0.75));
        assert_eq!(roc_auc(&[1, 1], &[0.3, 0.4]), None);
    }

    #[test]
    fn accuracy_counts_hits() {
        assert_eq!(accuracy(&[1, 1, 1, 0], &[1, 1, 1, 0]), 1.0);
        assert_eq!(accuracy(&[1, 0, 1, 0], &[1, 1, 1, 1]), 0.5);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn sweep_picks_first_maximum() {
        // Closed records sit at 0.40 and 0.45; open ones at 0.60 and above.
        let y = [0, 0, 1, 1, 1];
        let p = [0.40, 0.45, 0.60, 0.75, 0.90];
        let grid = ThresholdGrid::default().points();
        let choice = sweep_threshold(&y, &p, &grid);
        // Any t in (0.45, 0.60] is perfect; 0.46 is the first on the grid.
        assert_eq!(choice.threshold, 0.46);
        assert_eq!(choice.closed_f1, 1.0);
    }

    #[test]
    fn sweep_defaults_without_positive_f1() {
        let y = [1, 1, 1];
        let p = [0.8, 0.9, 0.95];
        let choice = sweep_threshold(&y, &p, &ThresholdGrid::default().points());
        assert_eq!(choice.threshold, DEFAULT_THRESHOLD);
        assert_eq!(choice.closed_f1, 0.0);
    }

    #[test]
    fn mean_std() {
        let m = MeanStd::of(&[1.0, 3.0]).unwrap();
        assert_eq!(m.mean, 2.0);
        assert_eq!(m.std, 1.0);
        assert!(MeanStd::of(&[]).is_none());
    }
}
