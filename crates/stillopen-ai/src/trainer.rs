//! Training pipeline: sampling, labelling, encoder fit, cross-validation,
//! final fit and threshold calibration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::{Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use stillopen_core::{CanonicalPlace, FEATURE_NAMES, FEATURE_SET_VERSION, Origin, RawDataset};
use tracing::{info, warn};

use crate::artifact::{ClassCounts, CrossValidation, FeatureImportance, TrainedArtifact};
use crate::config::TrainingConfig;
use crate::encoder::CategoryEncoder;
use crate::error::TrainError;
use crate::features::compute_features;
use crate::forest::{Model, RandomForest, class_balanced_weights};
use crate::metrics::{self, CLOSED, DEFAULT_THRESHOLD, MeanStd, OPEN, ThresholdChoice};
use crate::normalize::Normalizer;

pub struct Trainer {
    config: TrainingConfig,
}

/// Labelled design matrix built from canonical places.
struct Table {
    x: Array2<f64>,
    y: Vec<u8>,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// The instant staleness is measured against for this run.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.config.reference_time.unwrap_or_else(Utc::now)
    }

    /// Check required columns and normalize every record.
    pub fn normalize_datasets(
        &self,
        datasets: &[RawDataset],
        normalizer: &Normalizer,
    ) -> Result<Vec<CanonicalPlace>, TrainError> {
        let mut places = Vec::new();
        for ds in datasets {
            if ds.is_empty() {
                warn!(origin = %ds.origin, "dataset is empty");
                continue;
            }
            if let Some(&column) = ds.missing_columns().first() {
                return Err(TrainError::MissingColumn { origin: ds.origin, column });
            }
            places.extend(ds.records.iter().map(|r| normalizer.normalize(r, ds.origin)));
        }
        Ok(places)
    }

    /// Keep at most `overture_cap` Overture records, chosen by seeded sampling.
    /// Other origins and the relative order of kept records are untouched.
    pub fn cap_overture(&self, places: Vec<CanonicalPlace>) -> Vec<CanonicalPlace> {
        let overture: Vec<usize> = places
            .iter()
            .enumerate()
            .filter(|(_, p)| p.origin == Origin::Overture)
            .map(|(i, _)| i)
            .collect();
        let cap = self.config.overture_cap;
        if overture.len() <= cap {
            return places;
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut keep = vec![true; places.len()];
        for &i in &overture {
            keep[i] = false;
        }
        for &i in overture.choose_multiple(&mut rng, cap) {
            keep[i] = true;
        }
        info!(available = overture.len(), kept = cap, "sampled overture records");

        places
            .into_iter()
            .zip(keep)
            .filter_map(|(p, k)| k.then_some(p))
            .collect()
    }

    pub fn fit_encoder(&self, places: &[CanonicalPlace]) -> CategoryEncoder {
        CategoryEncoder::fit(places.iter().map(|p| p.category.as_str()), self.config.top_k)
    }

    /// Load, check, normalize and train in one step.
    pub fn train_datasets(&self, datasets: Vec<RawDataset>) -> Result<TrainedArtifact, TrainError> {
        let reference = self.reference_time();
        let normalizer = Normalizer::new(reference);
        let places = self.normalize_datasets(&datasets, &normalizer)?;

        let mut names: Vec<String> = Vec::new();
        for ds in &datasets {
            let name = ds.origin.to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        self.fit_places(places, names, reference)
    }

    /// Train on already-normalized places.
    pub fn train(&self, places: Vec<CanonicalPlace>) -> Result<TrainedArtifact, TrainError> {
        let mut names: Vec<String> = Vec::new();
        for p in &places {
            let name = p.origin.to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        self.fit_places(places, names, self.reference_time())
    }

    fn fit_places(
        &self,
        places: Vec<CanonicalPlace>,
        source_datasets: Vec<String>,
        reference_time: DateTime<Utc>,
    ) -> Result<TrainedArtifact, TrainError> {
        self.config.validate()?;

        let places = self.cap_overture(places);
        let total = places.len();
        let labelled: Vec<CanonicalPlace> =
            places.into_iter().filter(|p| p.open_label.is_some()).collect();
        if labelled.len() < total {
            info!(dropped = total - labelled.len(), "dropped records without a label");
        }
        if labelled.is_empty() {
            return Err(TrainError::EmptyTrainingSet);
        }

        let mut source_counts: BTreeMap<String, usize> = BTreeMap::new();
        for p in &labelled {
            *source_counts.entry(p.origin.to_string()).or_default() += 1;
        }

        let encoder = self.fit_encoder(&labelled);
        let table = build_table(&labelled, &encoder);
        let class_counts = ClassCounts {
            open: table.y.iter().filter(|&&l| l == OPEN).count(),
            closed: table.y.iter().filter(|&&l| l == CLOSED).count(),
        };
        info!(
            samples = table.y.len(),
            open = class_counts.open,
            closed = class_counts.closed,
            categories = encoder.num_labels(),
            "built training table"
        );

        let (model, cross_validation, choice) = if class_counts.open == 0 || class_counts.closed == 0 {
            let label = if class_counts.open > 0 { OPEN } else { CLOSED };
            warn!(label, "training set holds a single class, fitting a constant model");
            let pred = vec![label; table.y.len()];
            let choice = ThresholdChoice {
                threshold: DEFAULT_THRESHOLD,
                closed_f1: metrics::f1_score(&table.y, &pred, CLOSED),
            };
            (Model::Constant { label }, None, choice)
        } else {
            let (cv, calibration) = match self.cross_validate(&table, class_counts)? {
                Some((cv, oof)) => (Some(cv), oof),
                None => (None, Vec::new()),
            };

            let weights = class_balanced_weights(&table.y);
            let forest =
                RandomForest::fit(table.x.view(), &table.y, &weights, &self.config.forest, self.config.seed)?;

            let calibration = if calibration.is_empty() {
                warn!("calibrating threshold on in-sample probabilities");
                forest.predict_proba_rows(table.x.view())
            } else {
                calibration
            };
            let choice = metrics::sweep_threshold(&table.y, &calibration, &self.config.threshold.points());
            (Model::Forest(forest), cv, choice)
        };
        info!(
            threshold = choice.threshold,
            closed_f1 = choice.closed_f1,
            model = model.kind(),
            "calibrated decision threshold"
        );

        let mut feature_importances: Vec<FeatureImportance> = model
            .feature_importances()
            .map(|imp| {
                FEATURE_NAMES
                    .iter()
                    .zip(imp)
                    .map(|(name, &importance)| FeatureImportance {
                        name: name.to_string(),
                        importance,
                    })
                    .collect()
            })
            .unwrap_or_default();
        feature_importances.sort_by(|a, b| b.importance.total_cmp(&a.importance));

        Ok(TrainedArtifact {
            model,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            feature_set_version: FEATURE_SET_VERSION.to_string(),
            category_encoder: encoder,
            optimal_threshold: choice.threshold,
            closed_f1: choice.closed_f1,
            training_sample_count: table.y.len(),
            source_datasets,
            source_counts,
            class_counts,
            reference_time,
            trained_at: Utc::now(),
            cross_validation,
            feature_importances,
        })
    }

    /// Stratified k-fold. Returns the report and out-of-fold `P(open)` for
    /// every row, or `None` when either class has fewer members than folds.
    fn cross_validate(
        &self,
        table: &Table,
        counts: ClassCounts,
    ) -> Result<Option<(CrossValidation, Vec<f64>)>, TrainError> {
        let k = self.config.folds;
        if k < 2 || counts.open < k || counts.closed < k {
            warn!(folds = k, open = counts.open, closed = counts.closed, "skipping cross-validation");
            return Ok(None);
        }

        let fold_of = stratified_folds(&table.y, k, self.config.seed);
        let mut oof = vec![0.0; table.y.len()];
        let mut acc = Vec::with_capacity(k);
        let mut f1 = Vec::with_capacity(k);
        let mut auc = Vec::with_capacity(k);

        for fold in 0..k {
            let (train, test): (Vec<usize>, Vec<usize>) = (0..table.y.len()).partition(|&i| fold_of[i] != fold);
            let x = table.x.select(Axis(0), &train);
            let y: Vec<u8> = train.iter().map(|&i| table.y[i]).collect();
            let w = class_balanced_weights(&y);
            let seed = self.config.seed.wrapping_add(fold as u64 + 1);
            let forest = RandomForest::fit(x.view(), &y, &w, &self.config.forest, seed)?;

            let y_test: Vec<u8> = test.iter().map(|&i| table.y[i]).collect();
            let p_test = forest.predict_proba_rows(table.x.select(Axis(0), &test).view());
            let pred: Vec<u8> = p_test
                .iter()
                .map(|&p| metrics::classify_with_threshold(p, DEFAULT_THRESHOLD))
                .collect();
            for (&i, &p) in test.iter().zip(&p_test) {
                oof[i] = p;
            }

            acc.push(metrics::accuracy(&y_test, &pred));
            f1.push(metrics::macro_f1(&y_test, &pred));
            if let Some(a) = metrics::roc_auc(&y_test, &p_test) {
                auc.push(a);
            }
        }

        let (Some(accuracy), Some(macro_f1)) = (MeanStd::of(&acc), MeanStd::of(&f1)) else {
            return Ok(None);
        };
        let report = CrossValidation {
            folds: k,
            accuracy,
            macro_f1,
            roc_auc: MeanStd::of(&auc),
        };
        info!(
            folds = k,
            accuracy = report.accuracy.mean,
            macro_f1 = report.macro_f1.mean,
            roc_auc = report.roc_auc.map(|m| m.mean),
            "cross-validation"
        );
        Ok(Some((report, oof)))
    }
}

fn build_table(places: &[CanonicalPlace], encoder: &CategoryEncoder) -> Table {
    let mut rows = Vec::with_capacity(places.len());
    let mut y = Vec::with_capacity(places.len());
    for p in places {
        let Some(label) = p.open_label else { continue };
        rows.push(compute_features(p, Some(encoder)));
        y.push(label);
    }
    let x = Array2::from_shape_fn((rows.len(), FEATURE_NAMES.len()), |(i, j)| rows[i].values()[j]);
    Table { x, y }
}

/// Fold index per row; each class is shuffled and dealt round-robin.
fn stratified_folds(y: &[u8], k: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fold_of = vec![0; y.len()];
    for class in [CLOSED, OPEN] {
        let mut members: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        members.shuffle(&mut rng);
        for (pos, i) in members.into_iter().enumerate() {
            fold_of[i] = pos % k;
        }
    }
    fold_of
}
