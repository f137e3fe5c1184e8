//! Feature engineering shared by training and serving.
//!
//! [`compute_features`] is the only path from a [`CanonicalPlace`] to model
//! input. The trainer builds its table with it and the inference service
//! calls it per request, so the two cannot drift apart.

use stillopen_core::{CanonicalPlace, FEATURE_COUNT, FEATURE_NAMES, features as f};
use tracing::debug;

use crate::encoder::CategoryEncoder;

/// Substrings of a lower-cased name that suggest the place is not trading.
pub const CLOSURE_KEYWORDS: &[&str] = &[
    "closed",
    "former",
    "defunct",
    "out of business",
    "coming soon",
    "vacant",
    "empty",
    "available",
    "for lease",
    "for rent",
];

/// Numeric encoding of one place, ordered as [`FEATURE_NAMES`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    pub fn value(&self, index: usize) -> f64 {
        self.values[index]
    }

    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.values[i])
    }

    /// `(name, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }

    /// Arrange values in the order a model was trained with.
    ///
    /// Names this engineer does not produce are filled with 0 so artifacts
    /// trained against a newer or older feature set remain servable.
    pub fn reindex<S: AsRef<str>>(&self, names: &[S]) -> Vec<f64> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.get(name).unwrap_or_else(|| {
                    debug!(feature = name, "feature not produced, filling 0");
                    0.0
                })
            })
            .collect()
    }
}

/// Compute the feature vector for one place.
///
/// Pure and deterministic. Without an encoder both category features are 0.
pub fn compute_features(place: &CanonicalPlace, encoder: Option<&CategoryEncoder>) -> FeatureVector {
    let contact = &place.contact;
    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    let has_website = flag(!contact.websites.is_empty());
    let has_social = flag(!contact.socials.is_empty());
    let has_phone = flag(!contact.phones.is_empty());
    let has_email = flag(!contact.emails.is_empty());
    let has_brand = flag(place.brand_present);

    let source_confidences: Vec<f64> = place
        .provenance
        .iter()
        .filter_map(|p| p.confidence)
        .filter(|c| c.is_finite())
        .collect();
    let source_mean_confidence = if source_confidences.is_empty() {
        0.0
    } else {
        source_confidences.iter().sum::<f64>() / source_confidences.len() as f64
    };

    let (category_freq_score, category_label) = match encoder {
        Some(enc) => (enc.frequency(&place.category), f64::from(enc.label(&place.category))),
        None => (0.0, 0.0),
    };

    let mut values = [0.0; FEATURE_COUNT];
    values[f::HAS_WEBSITE] = has_website;
    values[f::NUM_WEBSITES] = contact.websites.len() as f64;
    values[f::HAS_SOCIAL] = has_social;
    values[f::NUM_SOCIALS] = contact.socials.len() as f64;
    values[f::HAS_PHONE] = has_phone;
    values[f::NUM_PHONES] = contact.phones.len() as f64;
    values[f::HAS_EMAIL] = has_email;
    values[f::HAS_BRAND] = has_brand;
    values[f::HAS_ADDRESS] = flag(place.address_present);
    values[f::CONFIDENCE] = place.confidence;
    values[f::NUM_SOURCES] = place.provenance.len() as f64;
    values[f::SOURCE_MEAN_CONFIDENCE] = source_mean_confidence;
    values[f::DAYS_SINCE_LAST_UPDATE] = f64::from(place.days_since_last_update);
    values[f::NAME_LENGTH] = place.name.chars().count() as f64;
    values[f::HAS_CLOSURE_KEYWORD] = flag(has_closure_keyword(&place.name));
    values[f::CATEGORY_FREQ_SCORE] = category_freq_score;
    values[f::CATEGORY_LABEL] = category_label;
    values[f::DIGITAL_PRESENCE] = has_website + has_social + has_phone + has_email + has_brand;

    for v in &mut values {
        if !v.is_finite() {
            *v = 0.0;
        }
    }

    FeatureVector { values }
}

pub fn has_closure_keyword(name: &str) -> bool {
    let lower = name.to_lowercase();
    CLOSURE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}
