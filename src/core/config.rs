//! Service and job configuration, read from TOML.
//!
//! ```toml
//! training_data = "users/me/training_points"
//! images = ["S1/scene_a", "S1/scene_b"]
//! register = true
//!
//! [service]
//! project = "my-project"
//!
//! [[exports]]
//! kind = "time_series_drive"
//! name = "ts"
//! folder = "exports"
//! ```

use crate::core::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_endpoint() -> String {
    "https://earthengine.googleapis.com".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Connection settings for the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the service
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Cloud project the calls are billed to
    pub project: String,
    /// OAuth bearer token; obtaining one is up to the caller
    #[serde(default)]
    pub access_token: Option<String>,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// One export step of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportTarget {
    /// Each time-series entry as a CSV in a drive folder
    TimeSeriesDrive { name: String, folder: String },
    /// Each time-series entry as a CSV under `training_data/` in a bucket
    TimeSeriesCloud { name: String, bucket: String },
    /// Each image as a GeoTIFF in a drive folder
    ImagesDrive { name: String, folder: String },
    /// Each image as tiled GeoTIFFs under `root/img/<filename>/` in a bucket
    ImagesCloud { root: String, bucket: String },
}

/// A complete sampling and export job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub service: ServiceConfig,
    /// Table asset with the training points or polygons
    pub training_data: String,
    /// Image assets, in time order; the first is the registration reference
    pub images: Vec<String>,
    /// Align every image to the first before sampling
    #[serde(default)]
    pub register: bool,
    /// Attach the derived `filename` property to every image
    #[serde(default = "default_true")]
    pub tag_filenames: bool,
    /// Copy point coordinates into `x`/`y` on every training feature;
    /// disable for polygon training data
    #[serde(default = "default_true")]
    pub insert_xy: bool,
    #[serde(default)]
    pub exports: Vec<ExportTarget>,
}

impl JobConfig {
    /// Parse and validate a job from TOML text.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let job: JobConfig = toml::from_str(text)?;
        job.validate()?;
        Ok(job)
    }

    /// Read, parse and validate a job file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            error,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check the job is runnable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.service.project.trim().is_empty() {
            return Err(ConfigError::Invalid("service.project is empty".to_string()));
        }
        if self.images.is_empty() {
            return Err(ConfigError::Invalid("no images listed".to_string()));
        }
        if self.training_data.trim().is_empty() {
            return Err(ConfigError::Invalid("training_data is empty".to_string()));
        }
        let needs_filenames = self
            .exports
            .iter()
            .any(|e| matches!(e, ExportTarget::ImagesCloud { .. }));
        if needs_filenames && !self.tag_filenames {
            return Err(ConfigError::Invalid(
                "images_cloud exports name files by the filename property; enable tag_filenames"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
