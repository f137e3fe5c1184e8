//! Dataset I/O: Parquet exports (original sample, Overture), OSM JSON, and
//! feature-table export.

mod dataset;
mod error;
mod json;
mod table;

pub use dataset::{DatasetFormat, load_dataset};
pub use error::StoreError;
pub use json::{parse_json_records, read_json_records};
pub use table::{FeatureTableRow, batches_to_records, read_parquet, write_feature_table};
