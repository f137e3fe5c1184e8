pub mod place;
pub mod schema;

pub use place::{
    CanonicalPlace, Contact, Origin, Provenance, RawDataset, RawRecord, UnknownOrigin,
};
pub use schema::{
    FEATURE_COUNT, FEATURE_NAMES, FEATURE_SET_VERSION, IDENTITY_COLUMNS, feature_table_schema,
    features,
};
