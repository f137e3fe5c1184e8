use std::path::PathBuf;

use stillopen_core::Origin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("{origin} dataset is missing required column '{column}'")]
    MissingColumn { origin: Origin, column: &'static str },

    #[error("no labelled records to train on")]
    EmptyTrainingSet,

    #[error("invalid training config: {0}")]
    InvalidConfig(String),

    #[error("tree fit failed: {0}")]
    Fit(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("artifact has no feature names")]
    NoFeatureNames,

    #[error("artifact model is malformed: {0}")]
    InvalidModel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to persist artifact: {0}")]
    Persist(#[from] tempfile::PersistError),
}
