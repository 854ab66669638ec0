//! Application configuration: one explicit value, built once at startup.
//!
//! Loaded from an optional JSON file; every field has a default, so a
//! partial file (or none at all) is fine. Command-line flags are applied
//! on top by `main`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use vectrace_pipeline::VectorConfig;
use vectrace_worker::{ExportConfig, SegmentationParams};

use crate::error::CliError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub segmentation: SegmentationParams,
    pub vector: VectorConfig,
    pub export: ExportConfig,
}

impl AppConfig {
    /// Read `path`, or return the defaults when there is no file.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| CliError::Config {
            path: path.to_owned(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}
