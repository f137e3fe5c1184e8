//! Optional TOML configuration file.
//!
//! ```toml
//! artifact = "model/place_status.json"
//!
//! [training]
//! seed = 42
//! overture_cap = 5000
//!
//! [training.forest]
//! n_estimators = 200
//! ```
//!
//! Command-line flags override anything read here.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use stillopen_ai::TrainingConfig;

pub const DEFAULT_ARTIFACT: &str = "model/place_status.json";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub artifact: Option<PathBuf>,
    pub training: TrainingConfig,
}

impl FileConfig {
    /// Read `path` when given; otherwise all defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Artifact path: flag, then file, then the built-in default.
    pub fn artifact_path(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.artifact.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT))
    }
}
