//! Canonical feature list and the Arrow schema of the engineered feature table.

use arrow::datatypes::{DataType, Field, Schema};

/// Bumped whenever [`FEATURE_NAMES`] changes. Stored in every trained artifact.
pub const FEATURE_SET_VERSION: &str = "v2";

/// Ordered feature names. Trainer and inference service both build vectors
/// in this order; the artifact stores the list it was trained with.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "has_website",
    "num_websites",
    "has_social",
    "num_socials",
    "has_phone",
    "num_phones",
    "has_email",
    "has_brand",
    "has_address",
    "confidence",
    "num_sources",
    "source_mean_confidence",
    "days_since_last_update",
    "name_length",
    "has_closure_keyword",
    "category_freq_score",
    "category_label",
    "digital_presence",
];

pub const FEATURE_COUNT: usize = 18;

/// Positions within [`FEATURE_NAMES`].
pub mod features {
    pub const HAS_WEBSITE: usize = 0;
    pub const NUM_WEBSITES: usize = 1;
    pub const HAS_SOCIAL: usize = 2;
    pub const NUM_SOCIALS: usize = 3;
    pub const HAS_PHONE: usize = 4;
    pub const NUM_PHONES: usize = 5;
    pub const HAS_EMAIL: usize = 6;
    pub const HAS_BRAND: usize = 7;
    pub const HAS_ADDRESS: usize = 8;
    pub const CONFIDENCE: usize = 9;
    pub const NUM_SOURCES: usize = 10;
    pub const SOURCE_MEAN_CONFIDENCE: usize = 11;
    pub const DAYS_SINCE_LAST_UPDATE: usize = 12;
    pub const NAME_LENGTH: usize = 13;
    pub const HAS_CLOSURE_KEYWORD: usize = 14;
    pub const CATEGORY_FREQ_SCORE: usize = 15;
    pub const CATEGORY_LABEL: usize = 16;
    pub const DIGITAL_PRESENCE: usize = 17;
}

/// Identity columns written ahead of the features in an exported table.
pub const IDENTITY_COLUMNS: [&str; 4] = ["name", "category", "origin", "open"];

/// Schema for the engineered feature table (one row per canonical place).
pub fn feature_table_schema() -> Schema {
    let mut fields = vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
        Field::new("origin", DataType::Utf8, false),
        Field::new("open", DataType::Int32, true),
    ];
    fields.extend(
        FEATURE_NAMES
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false)),
    );
    Schema::new(fields)
}
