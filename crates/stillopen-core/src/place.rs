//! Raw and canonical place records shared by the store, model and CLI crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An untyped place record as it arrives from a dataset export or the
/// storage layer's metadata blob.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Dataset a record was sourced from.
///
/// Drives normalization and sampling; never used as a model feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The proprietary labelled sample set (Overture schema plus an `open` column).
    Original,
    /// Overture Maps places export. Every record is assumed open.
    Overture,
    /// OpenStreetMap export, labelled via disused/closed tags.
    Osm,
}

#[derive(Debug, Error)]
#[error("unknown origin dataset: {0:?} (expected original, overture or osm)")]
pub struct UnknownOrigin(pub String);

impl Origin {
    pub const ALL: [Origin; 3] = [Origin::Original, Origin::Overture, Origin::Osm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Overture => "overture",
            Self::Osm => "osm",
        }
    }

    /// Columns a dataset of this origin must carry to be trainable.
    ///
    /// Each inner slice is a group of alternatives: the group is satisfied
    /// when at least one of its keys appears in the dataset.
    pub fn required_columns(&self) -> &'static [&'static [&'static str]] {
        match self {
            Self::Original => &[&["names"], &["categories"], &["open"]],
            Self::Overture => &[&["names"], &["categories"]],
            Self::Osm => &[&["name", "tags"]],
        }
    }

    /// Guess the shape of a record whose origin is not known, e.g. a metadata
    /// blob handed over by the storage layer at serving time.
    ///
    /// OSM records carry either raw `tags` or a nested `metadata` mapping;
    /// everything else is read with the Overture schema.
    pub fn infer(record: &RawRecord) -> Self {
        let osm_shaped = record.get("tags").is_some_and(|v| v.is_object())
            || record.get("metadata").is_some_and(|v| v.is_object() || v.is_string());
        if osm_shaped { Self::Osm } else { Self::Overture }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = UnknownOrigin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "overture" => Ok(Self::Overture),
            "osm" => Ok(Self::Osm),
            other => Err(UnknownOrigin(other.to_string())),
        }
    }
}

/// All records of one dataset, tagged with their origin.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub origin: Origin,
    pub records: Vec<RawRecord>,
}

impl RawDataset {
    pub fn new(origin: Origin, records: Vec<RawRecord>) -> Self {
        Self { origin, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Required column groups (see [`Origin::required_columns`]) that no
    /// record in the dataset carries. Reported by their first alternative.
    pub fn missing_columns(&self) -> Vec<&'static str> {
        self.origin
            .required_columns()
            .iter()
            .filter(|group| {
                !self
                    .records
                    .iter()
                    .any(|r| group.iter().any(|key| r.contains_key(*key)))
            })
            .map(|group| group[0])
            .collect()
    }
}

/// Contact channels of a place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub websites: Vec<String>,
    pub socials: Vec<String>,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
}

/// One upstream source that contributed to a place record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    pub confidence: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Source-independent attribute bag produced by normalization.
///
/// Every field carries a defined default so feature code never branches on
/// absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPlace {
    pub name: String,
    pub category: String,
    pub contact: Contact,
    pub brand_present: bool,
    pub address_present: bool,
    /// Record-level confidence in `[0, 1]`.
    pub confidence: f64,
    pub provenance: Vec<Provenance>,
    /// Whole days between the normalizer's reference time and the newest
    /// parseable provenance timestamp.
    pub days_since_last_update: u32,
    /// Ground truth: 1 open, 0 closed. `None` at serving time.
    pub open_label: Option<u8>,
    pub origin: Origin,
}

impl CanonicalPlace {
    pub const UNKNOWN_NAME: &'static str = "Unknown";
    pub const UNKNOWN_CATEGORY: &'static str = "unknown";
    /// Staleness used when no provenance timestamp can be parsed.
    pub const UNKNOWN_STALENESS_DAYS: u32 = 365;

    /// A place with every field at its default.
    pub fn empty(origin: Origin) -> Self {
        Self {
            name: Self::UNKNOWN_NAME.to_string(),
            category: Self::UNKNOWN_CATEGORY.to_string(),
            contact: Contact::default(),
            brand_present: false,
            address_present: false,
            confidence: 0.0,
            provenance: Vec::new(),
            days_since_last_update: Self::UNKNOWN_STALENESS_DAYS,
            open_label: None,
            origin,
        }
    }
}
