use std::path::Path;

use stillopen_core::{Origin, RawDataset};
use tracing::info;

use crate::{StoreError, batches_to_records, read_json_records, read_parquet};

/// On-disk format of a dataset export, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Parquet,
    Json,
}

impl DatasetFormat {
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("parquet") => Ok(Self::Parquet),
            Some("json" | "jsonl" | "ndjson") => Ok(Self::Json),
            _ => Err(StoreError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Load one dataset export as generic records tagged with `origin`.
pub fn load_dataset(path: &Path, origin: Origin) -> Result<RawDataset, StoreError> {
    let records = match DatasetFormat::from_path(path)? {
        DatasetFormat::Parquet => batches_to_records(&read_parquet(path)?)?,
        DatasetFormat::Json => read_json_records(path)?,
    };
    info!(
        origin = %origin,
        path = %path.display(),
        records = records.len(),
        "loaded dataset"
    );
    Ok(RawDataset::new(origin, records))
}
