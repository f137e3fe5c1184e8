//! Single-record inference against a loaded artifact.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stillopen_core::{CanonicalPlace, Origin, RawRecord};
use tracing::{debug, error, warn};

use crate::artifact::TrainedArtifact;
use crate::error::ArtifactError;
use crate::explain::{MOCK_EXPLANATION, explain};
use crate::features::{FeatureVector, compute_features};
use crate::forest::PlaceModel;
use crate::normalize::Normalizer;

/// Fixed confidence reported while no artifact is loaded.
pub const MOCK_CONFIDENCE: f64 = 0.82;
/// Confidence reported when the model only yields a hard label.
pub const LABEL_ONLY_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceStatus {
    Open,
    Closed,
}

impl PlaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    fn from_label(label: u8) -> Self {
        if label == 1 { Self::Open } else { Self::Closed }
    }
}

impl fmt::Display for PlaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a [`PredictionResult`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMode {
    /// Calibrated probability against the trained threshold.
    Model,
    /// The model gave a hard label only; confidence is fixed at 0.5.
    LabelOnly,
    /// No artifact loaded. The result says nothing about the input.
    Mock,
}

impl PredictionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::LabelOnly => "label_only",
            Self::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub status: PlaceStatus,
    pub confidence: f64,
    pub explanation: Vec<String>,
    pub mode: PredictionMode,
}

impl PredictionResult {
    fn mock() -> Self {
        Self {
            status: PlaceStatus::Open,
            confidence: MOCK_CONFIDENCE,
            explanation: vec![MOCK_EXPLANATION.to_string()],
            mode: PredictionMode::Mock,
        }
    }
}

/// A prediction with the place and features the model scored.
#[derive(Debug, Clone)]
pub struct PredictionDetail {
    pub result: PredictionResult,
    pub place: CanonicalPlace,
    /// Absent in mock mode.
    pub features: Option<FeatureVector>,
}

enum State {
    Serving(Arc<TrainedArtifact>),
    Mocking,
}

/// Serves predictions from one immutable artifact.
///
/// Cheap to clone; clones share the artifact.
#[derive(Clone)]
pub struct InferenceService {
    state: Arc<State>,
    /// Fixed staleness reference, for reproducible serving. `None` means now.
    reference: Option<DateTime<Utc>>,
}

impl InferenceService {
    /// Load the artifact at `path`.
    ///
    /// A missing file yields a service in mock mode. An unreadable or
    /// corrupt file is an error.
    pub fn open(path: &Path) -> Result<Self, ArtifactError> {
        match TrainedArtifact::load(path) {
            Ok(artifact) => Ok(Self::from_artifact(artifact)),
            Err(ArtifactError::NotFound(p)) => {
                warn!(path = %p.display(), "artifact not found, predictions will be mocks");
                Ok(Self::mock())
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`open`](Self::open) but degrades every failure to mock mode.
    pub fn open_or_mock(path: &Path) -> Self {
        Self::open(path).unwrap_or_else(|e| {
            error!(path = %path.display(), error = %e, "failed to load artifact, predictions will be mocks");
            Self::mock()
        })
    }

    pub fn from_artifact(artifact: TrainedArtifact) -> Self {
        Self::from_shared(Arc::new(artifact))
    }

    pub fn from_shared(artifact: Arc<TrainedArtifact>) -> Self {
        Self {
            state: Arc::new(State::Serving(artifact)),
            reference: None,
        }
    }

    pub fn mock() -> Self {
        Self {
            state: Arc::new(State::Mocking),
            reference: None,
        }
    }

    /// Measure staleness against `reference` instead of the current time.
    pub fn with_reference(mut self, reference: DateTime<Utc>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn is_mock(&self) -> bool {
        matches!(*self.state, State::Mocking)
    }

    pub fn artifact(&self) -> Option<&Arc<TrainedArtifact>> {
        match &*self.state {
            State::Serving(a) => Some(a),
            State::Mocking => None,
        }
    }

    /// Predict for a record of unknown origin; the shape is inferred.
    pub fn predict(&self, raw: &RawRecord) -> PredictionResult {
        self.predict_with_origin(raw, Origin::infer(raw))
    }

    pub fn predict_with_origin(&self, raw: &RawRecord, origin: Origin) -> PredictionResult {
        if self.is_mock() {
            return PredictionResult::mock();
        }
        self.predict_detailed(raw, origin).result
    }

    /// Like [`predict_with_origin`](Self::predict_with_origin), also
    /// returning the normalized place and the features it was scored on.
    pub fn predict_detailed(&self, raw: &RawRecord, origin: Origin) -> PredictionDetail {
        let normalizer = Normalizer::new(self.reference.unwrap_or_else(Utc::now));
        let place = normalizer.normalize(raw, origin);
        let (result, features) = self.score(&place);
        PredictionDetail { result, place, features }
    }

    pub fn predict_place(&self, place: &CanonicalPlace) -> PredictionResult {
        self.score(place).0
    }

    fn score(&self, place: &CanonicalPlace) -> (PredictionResult, Option<FeatureVector>) {
        let artifact = match &*self.state {
            State::Serving(a) => a,
            State::Mocking => return (PredictionResult::mock(), None),
        };

        let features = compute_features(place, Some(&artifact.category_encoder));
        let x = features.reindex(artifact.feature_names.as_slice());

        let (status, confidence, mode) = match artifact.model.predict_open_proba(&x) {
            Some(p_open) => {
                let p_open = p_open.clamp(0.0, 1.0);
                if p_open >= artifact.optimal_threshold {
                    (PlaceStatus::Open, p_open, PredictionMode::Model)
                } else {
                    (PlaceStatus::Closed, 1.0 - p_open, PredictionMode::Model)
                }
            }
            None => {
                let status = PlaceStatus::from_label(artifact.model.predict_label(&x));
                (status, LABEL_ONLY_CONFIDENCE, PredictionMode::LabelOnly)
            }
        };
        debug!(
            name = %place.name,
            status = %status,
            confidence,
            mode = mode.as_str(),
            "prediction"
        );

        let result = PredictionResult {
            status,
            confidence,
            explanation: explain(status, &features),
            mode,
        };
        (result, Some(features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stillopen_core::FEATURE_NAMES;
    use tempfile::TempDir;

    use crate::artifact::tests::{constant_artifact, write_with_model};
    use crate::forest::Model;
    use crate::forest::tests::{feature_forest, voting_forest};

    fn record(v: serde_json::Value) -> RawRecord {
        v.as_object().unwrap().clone()
    }

    fn voting(open: usize, total: usize) -> Model {
        voting_forest(FEATURE_NAMES.len(), open, total)
    }

    fn service(model: Model, threshold: f64) -> InferenceService {
        let mut artifact = constant_artifact(1);
        artifact.model = model;
        artifact.optimal_threshold = threshold;
        InferenceService::from_artifact(artifact)
    }

    #[test]
    fn below_threshold_is_closed_with_complement_confidence() {
        let svc = service(voting(11, 20), 0.62);
        let r = svc.predict(&record(json!({"names": {"primary": "Blue Door Cafe"}})));
        assert_eq!(r.status, PlaceStatus::Closed);
        assert!((r.confidence - 0.45).abs() < 1e-9);
        assert_eq!(r.mode, PredictionMode::Model);
        assert_eq!(r.explanation[0], "Model predicts this place is likely closed.");
    }

    #[test]
    fn at_threshold_is_open() {
        let svc = service(voting(31, 50), 0.62);
        let r = svc.predict(&RawRecord::new());
        assert_eq!(r.status, PlaceStatus::Open);
        assert!((r.confidence - 0.62).abs() < 1e-9);
    }

    #[test]
    fn mock_ignores_input() {
        let svc = InferenceService::mock();
        assert!(svc.is_mock());
        for raw in [
            RawRecord::new(),
            record(json!({"name": "Joe's Diner (CLOSED)", "tags": {"disused:amenity": "restaurant"}})),
        ] {
            let r = svc.predict(&raw);
            assert_eq!(r.status, PlaceStatus::Open);
            assert_eq!(r.confidence, MOCK_CONFIDENCE);
            assert_eq!(r.mode, PredictionMode::Mock);
            assert_eq!(r.explanation, vec![MOCK_EXPLANATION.to_string()]);
        }
    }

    #[test]
    fn hard_label_model_reports_half_confidence() {
        let svc = InferenceService::from_artifact(constant_artifact(0));
        let r = svc.predict(&RawRecord::new());
        assert_eq!(r.status, PlaceStatus::Closed);
        assert_eq!(r.confidence, LABEL_ONLY_CONFIDENCE);
        assert_eq!(r.mode, PredictionMode::LabelOnly);
    }

    #[test]
    fn stored_feature_order_is_authoritative() {
        let n = FEATURE_NAMES.len();
        let canonical = service(feature_forest(n, 0, 1, 0), 0.5);

        let mut reversed = constant_artifact(1);
        reversed.feature_names.reverse();
        reversed.model = feature_forest(n, n - 1, 1, 0);
        reversed.optimal_threshold = 0.5;
        let reversed = InferenceService::from_artifact(reversed);

        for raw in [
            record(json!({"websites": ["https://bluedoor.example"]})),
            record(json!({"phones": ["555-1111"]})),
        ] {
            assert_eq!(canonical.predict(&raw), reversed.predict(&raw));
        }
        let with_site = canonical.predict(&record(json!({"websites": ["https://bluedoor.example"]})));
        assert_eq!(with_site.status, PlaceStatus::Open);
    }

    #[test]
    fn unknown_feature_names_are_zero_filled() {
        let mut artifact = constant_artifact(1);
        artifact.feature_names = vec!["opening_hours_count".into(), "has_website".into()];
        artifact.model = feature_forest(2, 1, 9, 1);
        artifact.optimal_threshold = 0.5;
        let svc = InferenceService::from_artifact(artifact);
        let r = svc.predict(&record(json!({"websites": ["https://bluedoor.example"]})));
        assert_eq!(r.status, PlaceStatus::Open);
        assert!((r.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn osm_shape_inferred_for_metadata_blob() {
        let svc = service(voting(9, 10), 0.5).with_reference(Utc::now());
        let raw = record(json!({
            "name": "Joe's Diner (CLOSED)",
            "metadata": {"tags": {"disused:amenity": "restaurant"}}
        }));
        let r = svc.predict(&raw);
        assert_eq!(
            r.explanation.last().map(String::as_str),
            Some("Name suggests the place has closed.")
        );
    }

    #[test]
    fn open_missing_artifact_mocks() {
        let svc = InferenceService::open(Path::new("/nonexistent/model.json")).unwrap();
        assert!(svc.is_mock());
        assert!(svc.artifact().is_none());
    }

    #[test]
    fn open_corrupt_artifact_errors_but_open_or_mock_degrades() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(InferenceService::open(&path).is_err());
        assert!(InferenceService::open_or_mock(&path).is_mock());
    }

    #[test]
    fn malformed_model_fails_open_and_mocks_with_open_or_mock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        write_with_model(
            &path,
            json!({"kind": "forest", "n_features": FEATURE_NAMES.len(), "members": [], "importances": []}),
        );
        assert!(matches!(InferenceService::open(&path), Err(ArtifactError::InvalidModel(_))));

        let svc = InferenceService::open_or_mock(&path);
        assert!(svc.is_mock());
        assert_eq!(svc.predict(&RawRecord::new()).mode, PredictionMode::Mock);
    }

    #[test]
    fn detail_carries_the_scored_features() {
        let svc = service(feature_forest(FEATURE_NAMES.len(), 0, 1, 0), 0.5).with_reference(Utc::now());
        let raw = record(json!({
            "names": {"primary": "Blue Door Cafe"},
            "websites": ["https://bluedoor.example"]
        }));
        let detail = svc.predict_detailed(&raw, Origin::Overture);
        assert_eq!(detail.place.name, "Blue Door Cafe");
        assert_eq!(detail.result, svc.predict_with_origin(&raw, Origin::Overture));
        let features = detail.features.unwrap();
        assert_eq!(features.get("has_website"), Some(1.0));
        assert_eq!(detail.result.status, PlaceStatus::Open);

        let mock = InferenceService::mock().predict_detailed(&raw, Origin::Overture);
        assert!(mock.features.is_none());
        assert_eq!(mock.place.name, "Blue Door Cafe");
        assert_eq!(mock.result.mode, PredictionMode::Mock);
    }

    #[test]
    fn open_saved_artifact_serves() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        constant_artifact(1).save(&path).unwrap();
        let svc = InferenceService::open(&path).unwrap();
        assert!(!svc.is_mock());
        assert_eq!(svc.predict(&RawRecord::new()).mode, PredictionMode::LabelOnly);
    }

    #[test]
    fn service_is_shareable_across_threads() {
        let svc = service(voting(4, 5), 0.5);
        std::thread::scope(|s| {
            for _ in 0..4 {
                let svc = svc.clone();
                s.spawn(move || {
                    assert_eq!(svc.predict(&RawRecord::new()).status, PlaceStatus::Open);
                });
            }
        });
    }

    #[test]
    fn result_serializes_lowercase() {
        let r = InferenceService::mock().predict(&RawRecord::new());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "open");
        assert_eq!(v["mode"], "mock");
    }
}
