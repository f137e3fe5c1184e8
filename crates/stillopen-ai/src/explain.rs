//! Human-readable justification for a prediction.
//!
//! Every line is read off the feature vector the model was fed, never off
//! the raw record, so the text cannot disagree with the numbers.

use stillopen_core::features as f;

use crate::features::FeatureVector;
use crate::inference::PlaceStatus;

/// Staleness below which a record counts as recently updated.
pub const RECENT_DAYS: f64 = 90.0;
/// Staleness above which a record counts as abandoned.
pub const STALE_DAYS: f64 = 365.0;

pub const MOCK_EXPLANATION: &str = "Placeholder prediction: no trained model is loaded.";

/// Ordered explanation lines for a verdict.
///
/// Order: verdict, website, social, phone, source corroboration, staleness,
/// closure keyword.
pub fn explain(status: PlaceStatus, features: &FeatureVector) -> Vec<String> {
    let mut lines = Vec::with_capacity(7);

    lines.push(match status {
        PlaceStatus::Open => "Model predicts this place is likely open.".to_string(),
        PlaceStatus::Closed => "Model predicts this place is likely closed.".to_string(),
    });

    let present = |idx: usize| features.value(idx) > 0.0;
    lines.push(
        if present(f::HAS_WEBSITE) { "Website is listed." } else { "No website listed." }
            .to_string(),
    );
    lines.push(
        if present(f::HAS_SOCIAL) {
            "Social media presence detected."
        } else {
            "No social media presence."
        }
        .to_string(),
    );
    lines.push(
        if present(f::HAS_PHONE) { "Phone number listed." } else { "No phone number listed." }
            .to_string(),
    );

    let sources = features.value(f::NUM_SOURCES).max(0.0) as u64;
    lines.push(match sources {
        0 => "No data sources listed.".to_string(),
        1 => "Only 1 data source.".to_string(),
        n => format!("Confirmed by {n} data sources."),
    });

    let days = features.value(f::DAYS_SINCE_LAST_UPDATE);
    if days < RECENT_DAYS {
        lines.push(format!("Updated {} days ago.", days.max(0.0) as u64));
    } else if days > STALE_DAYS {
        lines.push("No updates in over a year.".to_string());
    }

    if present(f::HAS_CLOSURE_KEYWORD) {
        lines.push("Name suggests the place has closed.".to_string());
    }

    lines
}
