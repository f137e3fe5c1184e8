//! Place-status modelling: schema normalization, feature engineering, the
//! random forest trainer and calibrated single-record inference.

pub mod artifact;
pub mod config;
pub mod decode;
pub mod encoder;
mod error;
pub mod explain;
pub mod features;
pub mod forest;
pub mod inference;
pub mod metrics;
pub mod normalize;
pub mod trainer;

pub use artifact::{ClassCounts, CrossValidation, FeatureImportance, TrainedArtifact};
pub use config::{ForestConfig, ThresholdGrid, TrainingConfig};
pub use encoder::CategoryEncoder;
pub use error::{ArtifactError, TrainError};
pub use features::{FeatureVector, compute_features};
pub use forest::{Model, PlaceModel, RandomForest};
pub use inference::{InferenceService, PlaceStatus, PredictionDetail, PredictionMode, PredictionResult};
pub use normalize::Normalizer;
pub use trainer::Trainer;
