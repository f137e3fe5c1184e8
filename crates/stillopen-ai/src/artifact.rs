//! The trained artifact: the one contract between training and serving.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::encoder::CategoryEncoder;
use crate::error::ArtifactError;
use crate::forest::Model;
use crate::metrics::MeanStd;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedArtifact {
    pub model: Model,
    /// Model input order. Authoritative at inference time.
    pub feature_names: Vec<String>,
    pub feature_set_version: String,
    pub category_encoder: CategoryEncoder,
    pub optimal_threshold: f64,
    /// Closed-class F1 at `optimal_threshold` on the calibration probabilities.
    pub closed_f1: f64,
    pub training_sample_count: usize,
    pub source_datasets: Vec<String>,
    /// Labelled records per origin after sampling.
    pub source_counts: BTreeMap<String, usize>,
    pub class_counts: ClassCounts,
    pub reference_time: DateTime<Utc>,
    pub trained_at: DateTime<Utc>,
    #[serde(default)]
    pub cross_validation: Option<CrossValidation>,
    /// Sorted by decreasing importance. Empty for hard-label models.
    #[serde(default)]
    pub feature_importances: Vec<FeatureImportance>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub open: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub folds: usize,
    pub accuracy: MeanStd,
    pub macro_f1: MeanStd,
    /// Absent when no fold held both classes.
    pub roc_auc: Option<MeanStd>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub name: String,
    pub importance: f64,
}

impl TrainedArtifact {
    /// Write the artifact as JSON.
    ///
    /// The bytes go to a temporary file in the destination directory, which
    /// is then renamed over `path`; readers never see a partial artifact.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;

        info!(
            path = %path.display(),
            model = self.model.kind(),
            samples = self.training_sample_count,
            threshold = self.optimal_threshold,
            "saved artifact"
        );
        Ok(())
    }

    /// Read and check an artifact.
    ///
    /// Beyond parsing, the model is checked against `feature_names`, so an
    /// artifact that loads can always serve.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        if !path.exists() {
            return Err(ArtifactError::NotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        let artifact: Self = serde_json::from_slice(&bytes)?;
        if artifact.feature_names.is_empty() {
            return Err(ArtifactError::NoFeatureNames);
        }
        artifact
            .model
            .validate(artifact.feature_names.len())
            .map_err(ArtifactError::InvalidModel)?;
        info!(
            path = %path.display(),
            model = artifact.model.kind(),
            features = artifact.feature_names.len(),
            version = %artifact.feature_set_version,
            "loaded artifact"
        );
        Ok(artifact)
    }
}
