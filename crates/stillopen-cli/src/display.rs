//! Vertical card display for predictions and trained artifacts.

use std::fmt::{self, Write};

use stillopen_ai::{FeatureVector, PredictionMode, PredictionResult, TrainedArtifact};

const MAX_IMPORTANCES: usize = 10;

// ── Feature groupings ──

const CONTACT: &[&str] = &[
    "has_website",
    "num_websites",
    "has_social",
    "num_socials",
    "has_phone",
    "num_phones",
    "has_email",
    "digital_presence",
];

const IDENTITY: &[&str] = &[
    "has_brand",
    "has_address",
    "name_length",
    "has_closure_keyword",
    "category_freq_score",
    "category_label",
];

const PROVENANCE: &[&str] = &[
    "confidence",
    "num_sources",
    "source_mean_confidence",
    "days_since_last_update",
];

// ── Public API ──

/// Print one prediction as a card; `features` adds the input breakdown.
pub fn print_prediction_card(name: &str, result: &PredictionResult, features: Option<&FeatureVector>) {
    print!("{}", render_prediction_card(name, result, features));
}

pub fn render_prediction_card(
    name: &str,
    result: &PredictionResult,
    features: Option<&FeatureVector>,
) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_prediction_card(&mut out, name, result, features);
    out
}

fn write_prediction_card(
    out: &mut String,
    name: &str,
    result: &PredictionResult,
    features: Option<&FeatureVector>,
) -> fmt::Result {
    writeln!(out, "=== {name} ===")?;
    writeln!(out, "  {:<26} {}", "status", result.status)?;
    writeln!(out, "  {:<26} {:.3}", "confidence", result.confidence)?;
    writeln!(out, "  {:<26} {}", "mode", result.mode.as_str())?;
    if result.mode == PredictionMode::Mock {
        writeln!(out, "  (no trained artifact loaded; this is a placeholder)")?;
    }
    out.push('\n');

    writeln!(out, "Explanation")?;
    for line in &result.explanation {
        writeln!(out, "  - {line}")?;
    }
    out.push('\n');

    if let Some(features) = features {
        write_section(out, features, "Contact", CONTACT)?;
        write_section(out, features, "Identity", IDENTITY)?;
        write_section(out, features, "Provenance", PROVENANCE)?;
    }
    Ok(())
}

/// Print training metadata, cross-validation and feature importances.
pub fn print_artifact_report(artifact: &TrainedArtifact) {
    print!("{}", render_artifact_report(artifact));
}

pub fn render_artifact_report(artifact: &TrainedArtifact) -> String {
    let mut out = String::new();
    let _ = write_artifact_report(&mut out, artifact);
    out
}

fn write_artifact_report(out: &mut String, artifact: &TrainedArtifact) -> fmt::Result {
    writeln!(out, "=== Trained artifact ({}) ===", artifact.model.kind())?;

    writeln!(out, "Training")?;
    writeln!(out, "  {:<26} {}", "feature_set_version", artifact.feature_set_version)?;
    writeln!(out, "  {:<26} {}", "features", artifact.feature_names.len())?;
    writeln!(out, "  {:<26} {}", "samples", artifact.training_sample_count)?;
    writeln!(
        out,
        "  {:<26} {} open / {} closed",
        "classes", artifact.class_counts.open, artifact.class_counts.closed
    )?;
    writeln!(out, "  {:<26} {}", "source_datasets", artifact.source_datasets.join(", "))?;
    for (origin, count) in &artifact.source_counts {
        writeln!(out, "  {:<26} {}", format!("records[{origin}]"), count)?;
    }
    writeln!(out, "  {:<26} {}", "categories", artifact.category_encoder.num_labels())?;
    writeln!(out, "  {:<26} {}", "reference_time", artifact.reference_time.to_rfc3339())?;
    writeln!(out, "  {:<26} {}", "trained_at", artifact.trained_at.to_rfc3339())?;
    out.push('\n');

    writeln!(out, "Threshold")?;
    writeln!(out, "  {:<26} {:.2}", "optimal_threshold", artifact.optimal_threshold)?;
    writeln!(out, "  {:<26} {:.3}", "closed_f1", artifact.closed_f1)?;
    out.push('\n');

    if let Some(cv) = &artifact.cross_validation {
        writeln!(out, "Cross-validation ({} folds)", cv.folds)?;
        writeln!(out, "  {:<26} {:.3} ± {:.3}", "accuracy", cv.accuracy.mean, cv.accuracy.std)?;
        writeln!(out, "  {:<26} {:.3} ± {:.3}", "macro_f1", cv.macro_f1.mean, cv.macro_f1.std)?;
        match &cv.roc_auc {
            Some(auc) => {
                writeln!(out, "  {:<26} {:.3} ± {:.3}", "roc_auc", auc.mean, auc.std)?;
            }
            None => {
                writeln!(out, "  {:<26} n/a", "roc_auc")?;
            }
        }
        out.push('\n');
    }

    if !artifact.feature_importances.is_empty() {
        writeln!(out, "Feature importances")?;
        for fi in artifact.feature_importances.iter().take(MAX_IMPORTANCES) {
            writeln!(out, "  {:<26} {:.4}", fi.name, fi.importance)?;
        }
        let rest = artifact.feature_importances.len().saturating_sub(MAX_IMPORTANCES);
        if rest > 0 {
            writeln!(out, "  ... and {rest} more")?;
        }
        out.push('\n');
    }
    Ok(())
}

// ── Section rendering ──

fn write_section(out: &mut String, features: &FeatureVector, header: &str, names: &[&str]) -> fmt::Result {
    writeln!(out, "{header}")?;
    for &name in names {
        let Some(value) = features.get(name) else {
            continue;
        };
        writeln!(out, "  {:<26} {}", name, format_value(value))?;
    }
    out.push('\n');
    Ok(())
}

/// Integral values print without decimals.
fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v:.3}")
    }
}
