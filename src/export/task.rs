//! Export job descriptions.

use crate::core::error::{HandleId, RemoteResult};
use crate::execution::service::ImageryService;
use crate::graph::expr::Expr;
use crate::graph::handle::{FeatureCollection, Geometry, Handle, Image};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier the service assigns to a started job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an export writes its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    /// Folder in the user's drive
    Drive { folder: String },
    /// Cloud storage bucket
    CloudStorage { bucket: String },
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Drive { folder } => write!(f, "{}", folder),
            Destination::CloudStorage { bucket } => write!(f, "gs://{}", bucket),
        }
    }
}

/// Output format of a table export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableFormat {
    #[serde(rename = "CSV")]
    Csv,
    #[serde(rename = "GEO_JSON")]
    GeoJson,
}

/// Output format of an image export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    #[serde(rename = "GEO_TIFF")]
    GeoTiff,
}

/// Parameters of an image export.
#[derive(Debug, Clone)]
pub struct ImageExportOptions {
    /// Output resolution in meters per pixel
    pub scale: f64,
    /// Region to export; the image footprint when None
    pub region: Option<Geometry>,
    /// Size in pixels of the shards the image is computed in
    pub shard_size: Option<u32>,
    /// Pixel dimensions of each output file
    pub file_dimensions: Option<(u32, u32)>,
    /// Skip tiles that contain no unmasked pixels
    pub skip_empty_tiles: bool,
    /// Upper bound on the number of exported pixels
    pub max_pixels: Option<u64>,
    pub format: ImageFormat,
}

impl ImageExportOptions {
    /// Defaults at the given scale.
    pub fn new(scale: f64) -> Self {
        Self {
            scale,
            region: None,
            shard_size: None,
            file_dimensions: None,
            skip_empty_tiles: false,
            max_pixels: None,
            format: ImageFormat::GeoTiff,
        }
    }

    pub fn with_region(mut self, region: Geometry) -> Self {
        self.region = Some(region);
        self
    }

    /// Cut the output into square `size`×`size` files computed in shards of the same size.
    pub fn with_tiles(mut self, size: u32) -> Self {
        self.shard_size = Some(size);
        self.file_dimensions = Some((size, size));
        self
    }

    pub fn with_skip_empty_tiles(mut self, skip: bool) -> Self {
        self.skip_empty_tiles = skip;
        self
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = Some(max_pixels);
        self
    }
}

/// What is being exported.
#[derive(Debug, Clone)]
pub enum ExportKind {
    Table { format: TableFormat },
    Image(ImageExportOptions),
}

/// A fully described export job.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Handle the exported data came from
    pub correlation_id: HandleId,
    /// Task name shown by the service
    pub description: String,
    pub destination: Destination,
    /// Output path (without extension) inside the destination
    pub file_name_prefix: Option<String>,
    /// The data to export
    pub expression: Arc<Expr>,
    pub kind: ExportKind,
}

impl ExportRequest {
    /// Table export of a feature collection.
    pub fn table(
        collection: &FeatureCollection,
        description: impl Into<String>,
        destination: Destination,
        format: TableFormat,
    ) -> Self {
        Self {
            correlation_id: collection.id(),
            description: description.into(),
            destination,
            file_name_prefix: None,
            expression: collection.expr().clone(),
            kind: ExportKind::Table { format },
        }
    }

    /// Raster export of an image.
    pub fn image(
        image: &Image,
        description: impl Into<String>,
        destination: Destination,
        options: ImageExportOptions,
    ) -> Self {
        Self {
            correlation_id: image.id(),
            description: description.into(),
            destination,
            file_name_prefix: None,
            expression: image.expr().clone(),
            kind: ExportKind::Image(options),
        }
    }

    /// Set the output path prefix.
    pub fn with_file_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_name_prefix = Some(prefix.into());
        self
    }

    /// Submit and start the job. Returns as soon as the service accepts it.
    pub fn start(self, service: &dyn ImageryService) -> RemoteResult<SubmittedTask> {
        let task_id = service.start_export(&self)?;
        Ok(SubmittedTask {
            task_id,
            correlation_id: self.correlation_id,
            description: self.description,
            destination: self.destination,
        })
    }
}

/// A job the service has accepted. Nothing here tracks its completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedTask {
    pub task_id: TaskId,
    /// Id of the handle that was exported
    pub correlation_id: HandleId,
    pub description: String,
    pub destination: Destination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_request_correlates_with_collection() {
        let collection = FeatureCollection::load("training");
        let request = ExportRequest::table(
            &collection,
            "ts_0",
            Destination::Drive {
                folder: "exports".to_string(),
            },
            TableFormat::Csv,
        );
        assert_eq!(request.correlation_id, collection.id());
        assert!(Arc::ptr_eq(&request.expression, collection.expr()));
        assert!(request.file_name_prefix.is_none());
    }

    #[test]
    fn test_image_options_tiles() {
        let options = ImageExportOptions::new(10.0).with_tiles(64);
        assert_eq!(options.shard_size, Some(64));
        assert_eq!(options.file_dimensions, Some((64, 64)));
    }

    #[test]
    fn test_destination_display() {
        let bucket = Destination::CloudStorage {
            bucket: "my-bucket".to_string(),
        };
        assert_eq!(bucket.to_string(), "gs://my-bucket");
        let json = serde_json::to_string(&bucket).unwrap();
        assert_eq!(json, r#"{"type":"cloud_storage","bucket":"my-bucket"}"#);
    }
}
